//! Text preprocessing pipeline for the SPIMI builder: lowercase, strip
//! non-word characters, tokenize on whitespace, drop stopwords and
//! non-alphabetic tokens, stem. Mirrors `indexing/utils_spimi.py::preprocess`.

use std::collections::HashSet;

use rust_stemmers::Stemmer;

/// Runs the full pipeline over `text`, returning stemmed terms in order.
pub fn preprocess(text: &str, stopwords: &HashSet<String>, stemmer: &Stemmer) -> Vec<String> {
	tokenize(text)
		.into_iter()
		.filter(|t| !t.is_empty() && t.chars().all(char::is_alphabetic) && !stopwords.contains(t))
		.map(|t| stemmer.stem(&t).into_owned())
		.collect()
}

/// Lowercases, replaces every run of non-alphanumeric characters with a
/// single space, then splits on whitespace — a direct port of
/// `re.sub(r"[^\w\s]", " ") + word_tokenize`.
fn tokenize(text: &str) -> Vec<String> {
	text.to_lowercase()
		.chars()
		.map(|c| if c.is_alphanumeric() { c } else { ' ' })
		.collect::<String>()
		.split_whitespace()
		.map(str::to_owned)
		.collect()
}

/// Builds the default injectable stemmer (Snowball/Porter2, English),
/// mirroring `SnowballStemmer("english")`.
pub fn default_stemmer() -> Stemmer {
	Stemmer::create(::rust_stemmers::Algorithm::English)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn stop(words: &[&str]) -> HashSet<String> {
		words.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn lowercases_strips_punctuation_and_tokenizes() {
		let toks = tokenize("Hello, World! Running-fast.");
		assert_eq!(toks, vec!["hello", "world", "running", "fast"]);
	}

	#[test]
	fn drops_stopwords_and_digits_then_stems() {
		let stemmer = default_stemmer();
		let stopwords = stop(&["the", "and"]);
		let out = preprocess("The dogs and cats were running 123 fast", &stopwords, &stemmer);
		assert_eq!(out, vec!["dog", "cat", "were", "run", "fast"]);
	}

	#[test]
	fn empty_text_yields_no_terms() {
		let stemmer = default_stemmer();
		assert!(preprocess("   ", &HashSet::new(), &stemmer).is_empty());
	}
}
