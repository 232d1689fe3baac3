//! ROUGE-1, ROUGE-2 and ROUGE-L F-measures.
//!
//! Text is lower-cased and split on every non-alphanumeric ASCII character;
//! no stemming. Corpus scores are the mean of the per-pair scores.

use serde::Serialize;
use std::collections::HashMap;

/// F-measures for one prediction/reference pair, or a corpus mean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RougeScores {
    pub rouge1: f64,
    pub rouge2: f64,
    #[serde(rename = "rougeL")]
    pub rouge_l: f64,
}

pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn f_measure(overlap: f64, candidate_len: usize, reference_len: usize) -> f64 {
    if candidate_len == 0 || reference_len == 0 || overlap == 0.0 {
        return 0.0;
    }
    let precision = overlap / candidate_len as f64;
    let recall = overlap / reference_len as f64;
    2.0 * precision * recall / (precision + recall)
}

fn ngrams(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if n == 0 || tokens.len() < n {
        return counts;
    }
    for gram in tokens.windows(n) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

/// ROUGE-N F-measure with clipped n-gram counts.
pub fn rouge_n(candidate: &[String], reference: &[String], n: usize) -> f64 {
    let cand = ngrams(candidate, n);
    let refs = ngrams(reference, n);
    let overlap: usize = cand
        .iter()
        .map(|(gram, c)| refs.get(gram).map_or(0, |r| (*c).min(*r)))
        .sum();
    f_measure(
        overlap as f64,
        cand.values().sum(),
        refs.values().sum(),
    )
}

fn lcs_len(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            cur[j + 1] = if x == y {
                prev[j] + 1
            } else {
                cur[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// ROUGE-L F-measure (longest common subsequence).
pub fn rouge_l(candidate: &[String], reference: &[String]) -> f64 {
    f_measure(
        lcs_len(candidate, reference) as f64,
        candidate.len(),
        reference.len(),
    )
}

pub fn score(prediction: &str, reference: &str) -> RougeScores {
    let cand = tokenize(prediction);
    let refs = tokenize(reference);
    RougeScores {
        rouge1: rouge_n(&cand, &refs, 1),
        rouge2: rouge_n(&cand, &refs, 2),
        rouge_l: rouge_l(&cand, &refs),
    }
}

/// Mean scores over zipped pairs. Extra items on either side are ignored.
pub fn score_corpus(predictions: &[String], references: &[String]) -> RougeScores {
    let pairs: Vec<RougeScores> = predictions
        .iter()
        .zip(references)
        .map(|(p, r)| score(p, r))
        .collect();
    if pairs.is_empty() {
        return RougeScores::default();
    }
    let n = pairs.len() as f64;
    RougeScores {
        rouge1: pairs.iter().map(|s| s.rouge1).sum::<f64>() / n,
        rouge2: pairs.iter().map(|s| s.rouge2).sum::<f64>() / n,
        rouge_l: pairs.iter().map(|s| s.rouge_l).sum::<f64>() / n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn tokenizer_drops_punctuation_and_case() {
        assert_eq!(tokenize("The cat's HAT, 2x!"), vec!["the", "cat", "s", "hat", "2x"]);
    }

    #[test]
    fn identical_texts_score_one() {
        let s = score("the cat sat on the mat", "the cat sat on the mat");
        assert!(close(s.rouge1, 1.0) && close(s.rouge2, 1.0) && close(s.rouge_l, 1.0));
    }

    #[test]
    fn partial_overlap() {
        // candidate: the cat was found under the bed (7 tokens)
        // reference: the cat was under the bed (6 tokens)
        let s = score("the cat was found under the bed", "the cat was under the bed");
        // unigram overlap 6: p = 6/7, r = 1
        assert!(close(s.rouge1, 2.0 * (6.0 / 7.0) / (6.0 / 7.0 + 1.0)));
        // bigrams: cand 6, ref 5, shared 4 (the cat, cat was, under the, the bed)
        let p = 4.0 / 6.0;
        let r = 4.0 / 5.0;
        assert!(close(s.rouge2, 2.0 * p * r / (p + r)));
        // LCS = 6
        assert!(close(s.rouge_l, s.rouge1));
    }

    #[test]
    fn disjoint_or_empty_is_zero() {
        assert_eq!(score("alpha beta", "gamma delta"), RougeScores::default());
        assert_eq!(score("", "gamma"), RougeScores::default());
        assert_eq!(score_corpus(&[], &[]), RougeScores::default());
    }

    #[test]
    fn corpus_is_the_pair_mean() {
        let preds = vec!["a b".to_string(), "c d".to_string()];
        let refs = vec!["a b".to_string(), "x y".to_string()];
        let s = score_corpus(&preds, &refs);
        assert!(close(s.rouge1, 0.5));
        let json = serde_json::to_value(s).unwrap();
        assert!(json.get("rougeL").is_some());
    }
}
