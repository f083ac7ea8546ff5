use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.,!?;:'"()\[\]{}]"#).expect("punctuation pattern"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));
static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("relation pattern"));

/// Lowercase, strip punctuation, collapse whitespace. No alias folding.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let stripped = PUNCTUATION.replace_all(&lowered, "");
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "did", "do", "does", "for", "from",
    "how", "in", "is", "it", "me", "of", "on", "or", "tell", "that", "the", "to", "was", "what",
    "when", "where", "which", "who", "why", "with",
];

/// Normalized words of `text` that carry meaning on their own: longer than
/// two characters and not a stopword. Order kept, duplicates dropped.
pub fn content_words(text: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for word in normalize_name(text).split(' ') {
        if word.len() > 2 && !STOPWORDS.contains(&word) && !words.iter().any(|w| w == word) {
            words.push(word.to_string());
        }
    }
    words
}

/// `"Works With"` -> `works_with`. Empty input maps to `related_to`.
pub fn normalize_relation_type(relation: &str) -> String {
    let lowered = relation.trim().to_lowercase();
    let snake = NON_WORD.replace_all(&lowered, "_");
    let snake = snake.trim_matches('_');
    if snake.is_empty() {
        "related_to".to_string()
    } else {
        snake.to_string()
    }
}

/// Fuzzy similarity of two entity names in `[0, 1]`.
///
/// Both names are normalized first; the score is the larger of word-level
/// Jaccard and character-bigram Dice, so it tolerates both reordered words
/// and small spelling differences.
pub fn name_similarity(a: &str, b: &str) -> f32 {
    let a = normalize_name(a);
    let b = normalize_name(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    word_jaccard(&a, &b).max(bigram_dice(&a, &b))
}

fn word_jaccard(a: &str, b: &str) -> f32 {
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        return 0.0;
    }
    words_a.intersection(&words_b).count() as f32 / union as f32
}

fn bigram_dice(a: &str, b: &str) -> f32 {
    fn bigrams(s: &str) -> Vec<(char, char)> {
        let chars: Vec<char> = s.chars().filter(|c| !c.is_whitespace()).collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    }

    let bigrams_a = bigrams(a);
    let mut bigrams_b = bigrams(b);
    let total = bigrams_a.len() + bigrams_b.len();
    if total == 0 {
        return 0.0;
    }

    let mut shared = 0;
    for pair in &bigrams_a {
        if let Some(pos) = bigrams_b.iter().position(|p| p == pair) {
            bigrams_b.swap_remove(pos);
            shared += 1;
        }
    }
    (2 * shared) as f32 / total as f32
}
