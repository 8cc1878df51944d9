use unicode_segmentation::UnicodeSegmentation;

/// Tokenize text into lowercase word tokens, filtering stopwords and short tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words()
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() >= 2 && !is_stopword(w))
        .collect()
}

/// Generate character n-grams (shingles) from text.
pub fn shingles(text: &str, n: usize) -> Vec<String> {
    let lower = text.to_lowercase();
    let chars: Vec<char> = lower.chars().collect();
    if chars.len() < n {
        return vec![lower];
    }
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

/// Generate word n-grams from a token list.
pub fn word_ngrams(tokens: &[String], n: usize) -> Vec<String> {
    if tokens.len() < n {
        return vec![tokens.join(" ")];
    }
    tokens
        .windows(n)
        .map(|w| w.join(" "))
        .collect()
}

/// All word n-grams of length 1..=max_n (unigrams first).
pub fn ngram_range(tokens: &[String], max_n: usize) -> Vec<String> {
    let mut out = tokens.to_vec();
    for n in 2..=max_n {
        if tokens.len() >= n {
            out.extend(word_ngrams(tokens, n));
        }
    }
    out
}

fn is_stopword(word: &str) -> bool {
    matches!(
        word,
        "an" | "the" | "is" | "it" | "of" | "to" | "in" | "for" | "on" | "with"
        | "at" | "by" | "from" | "as" | "or" | "and" | "not" | "be" | "are"
        // Russian
        | "и" | "в" | "во" | "на" | "с" | "со" | "для" | "по" | "из" | "от" | "до"
        | "не" | "или" | "без" | "под" | "при" | "к" | "ко" | "о" | "об" | "за"
    )
}
