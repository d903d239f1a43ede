/// Token and label vocabularies for tagged corpora
///
/// Corpus lines look like `word<split_char>label`; `-DOCSTART-` lines and
/// blank lines (sentence boundaries) are skipped when building the mapping.
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, TaggerError};

pub const UNK: &str = "UNK";
pub const BEGIN: &str = "<>";
pub const END: &str = "</>";
pub const START_LINE: &str = "-DOCSTART-";

/// How words missing from the vocabulary are mapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPolicy {
    /// Every unknown word maps to `UNK` (index 0)
    Plain,
    /// Unknown words are bucketed by surface shape; the table also reserves
    /// `<>` and `</>` for sentence padding
    Categories,
}

type ShapeTest = fn(&str) -> bool;

/// Unknown-word shape categories, tried in order
pub const UNKNOWN_CATEGORIES: [(&str, ShapeTest); 15] = [
    ("twoDigitNum", |w| is_non_leading_zero_number(w, 2)),
    ("fourDigitNum", |w| is_non_leading_zero_number(w, 4)),
    ("containsDigitAndAlpha", |w| {
        has_digit(w) && w.chars().any(|c| c.is_ascii_alphabetic() || c == '_')
    }),
    ("containsDigitAndDash", |w| has_digit(w) && w.contains('-')),
    ("containsDigitAndSlash", |w| has_digit(w) && w.contains('/')),
    ("containsDigitAndComma", |w| has_digit(w) && w.contains(',')),
    ("containsDigitAndPeriod", |w| has_digit(w) && w.contains('.')),
    ("otherNum", is_number),
    ("allCaps", is_all_upper),
    ("capPeriod", |w| {
        let chars: Vec<char> = w.chars().collect();
        chars.len() == 2 && chars[1] == '.' && chars[0].is_uppercase()
    }),
    ("initCap", |w| {
        w.chars().count() > 1 && w.chars().next().map_or(false, char::is_uppercase)
    }),
    ("lowerCase", is_all_lower),
    ("punkMark", |w| {
        [",", ".", ";", "?", "!", ":", "-", "&"].contains(&w)
    }),
    ("containsNonAlphaNumeric", |w| {
        w.chars().any(|c| !(c.is_alphanumeric() || c == '_'))
    }),
    ("%PerCent%", |w| {
        w.chars().count() > 1 && w.starts_with('%') && is_number(&w[1..])
    }),
];

fn has_digit(w: &str) -> bool {
    w.chars().any(|c| c.is_numeric())
}

fn is_number(w: &str) -> bool {
    !w.is_empty() && w.chars().all(|c| c.is_numeric())
}

fn is_non_leading_zero_number(w: &str, len: usize) -> bool {
    w.chars().count() == len && is_number(w) && !w.starts_with('0')
}

fn cased(w: &str) -> impl Iterator<Item = char> + '_ {
    w.chars().filter(|c| c.is_uppercase() || c.is_lowercase())
}

/// At least one cased character, all of them upper case
fn is_all_upper(w: &str) -> bool {
    cased(w).next().is_some() && cased(w).all(char::is_uppercase)
}

/// At least one cased character, all of them lower case
fn is_all_lower(w: &str) -> bool {
    cased(w).next().is_some() && cased(w).all(char::is_lowercase)
}

/// Bidirectional token and label index tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMapper {
    min_frequency: usize,
    split_char: char,
    policy: UnknownPolicy,
    token_to_idx: HashMap<String, usize>,
    idx_to_token: Vec<String>,
    label_to_idx: HashMap<String, usize>,
    idx_to_label: Vec<String>,
}

impl Default for TokenMapper {
    fn default() -> Self {
        Self::new(0, '\t', UnknownPolicy::Plain)
    }
}

impl TokenMapper {
    pub fn new(min_frequency: usize, split_char: char, policy: UnknownPolicy) -> Self {
        Self {
            min_frequency,
            split_char,
            policy,
            token_to_idx: HashMap::new(),
            idx_to_token: Vec::new(),
            label_to_idx: HashMap::new(),
            idx_to_label: Vec::new(),
        }
    }

    pub fn policy(&self) -> UnknownPolicy {
        self.policy
    }

    pub fn tokens_dim(&self) -> usize {
        self.idx_to_token.len()
    }

    pub fn labels_dim(&self) -> usize {
        self.idx_to_label.len()
    }

    /// Build the mapping from a corpus file
    pub fn create_mapping<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            TaggerError::DataLoad(format!("cannot open corpus {}: {}", path.display(), e))
        })?;
        self.create_mapping_from_reader(BufReader::new(file))
    }

    /// Build the mapping from corpus lines, replacing any previous mapping
    pub fn create_mapping_from_reader<R: BufRead>(&mut self, reader: R) -> Result<()> {
        let mut word_counts: Vec<(String, usize)> = Vec::new();
        let mut word_slots: HashMap<String, usize> = HashMap::new();
        let mut labels: Vec<String> = Vec::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.starts_with(START_LINE) || line.is_empty() {
                continue;
            }

            let (word, label) = split_line(line, self.split_char).ok_or_else(|| {
                TaggerError::DataLoad(format!("line {}: expected word and label in {:?}", line_no + 1, line))
            })?;

            match word_slots.get(word) {
                Some(&slot) => word_counts[slot].1 += 1,
                None => {
                    word_slots.insert(word.to_string(), word_counts.len());
                    word_counts.push((word.to_string(), 1));
                }
            }
            if !labels.iter().any(|l| l == label) {
                labels.push(label.to_string());
            }
        }

        self.token_to_idx.clear();
        self.idx_to_token.clear();
        self.label_to_idx.clear();
        self.idx_to_label.clear();

        self.init_reserved_tokens();
        for (word, count) in word_counts {
            if count >= self.min_frequency {
                self.push_token(&word);
            }
        }
        for label in labels {
            self.label_to_idx.insert(label.clone(), self.idx_to_label.len());
            self.idx_to_label.push(label);
        }

        log::debug!(
            "Built mapping with {} tokens and {} labels",
            self.tokens_dim(),
            self.labels_dim()
        );
        Ok(())
    }

    fn push_token(&mut self, token: &str) {
        if !self.token_to_idx.contains_key(token) {
            self.token_to_idx.insert(token.to_string(), self.idx_to_token.len());
            self.idx_to_token.push(token.to_string());
        }
    }

    fn init_reserved_tokens(&mut self) {
        match self.policy {
            UnknownPolicy::Plain => self.push_token(UNK),
            UnknownPolicy::Categories => {
                self.push_token(BEGIN);
                self.push_token(END);
                for (category, _) in UNKNOWN_CATEGORIES.iter() {
                    self.push_token(category);
                }
                self.push_token(UNK);
            }
        }
    }

    /// Index of a raw token, falling back to its unknown bucket
    pub fn token_index(&self, raw_token: &str) -> usize {
        if let Some(&idx) = self.token_to_idx.get(raw_token) {
            return idx;
        }

        if self.policy == UnknownPolicy::Categories {
            let category = UNKNOWN_CATEGORIES
                .iter()
                .find(|(_, matches)| matches(raw_token))
                .and_then(|(name, _)| self.token_to_idx.get(*name));
            if let Some(&idx) = category {
                return idx;
            }
        }

        self.token_to_idx.get(UNK).copied().unwrap_or(0)
    }

    pub fn label_index(&self, raw_label: &str) -> Result<usize> {
        self.label_to_idx
            .get(raw_label)
            .copied()
            .ok_or_else(|| TaggerError::DataLoad(format!("unknown label {:?}", raw_label)))
    }

    pub fn token(&self, index: usize) -> Option<&str> {
        self.idx_to_token.get(index).map(String::as_str)
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.idx_to_label.get(index).map(String::as_str)
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// `word<split>label`, ignoring anything after the label
fn split_line(line: &str, split_char: char) -> Option<(&str, &str)> {
    let mut parts = line.split(split_char);
    let word = parts.next()?;
    let label = parts.next()?;
    Some((word, label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const CORPUS: &str = "-DOCSTART-\tO\n\nThe\tDT\ndog\tNN\nbarks\tVBZ\n\nThe\tDT\ncat\tNN\n";

    fn build(policy: UnknownPolicy, min_frequency: usize) -> Result<TokenMapper> {
        let mut mapper = TokenMapper::new(min_frequency, '\t', policy);
        mapper.create_mapping_from_reader(Cursor::new(CORPUS))?;
        Ok(mapper)
    }

    #[test]
    fn test_plain_mapping_layout() -> Result<()> {
        let mapper = build(UnknownPolicy::Plain, 0)?;

        assert_eq!(mapper.tokens_dim(), 5);
        assert_eq!(mapper.token_index(UNK), 0);
        assert_eq!(mapper.token_index("The"), 1);
        assert_eq!(mapper.token_index("cat"), 4);
        assert_eq!(mapper.token_index("zebra"), 0);

        assert_eq!(mapper.labels_dim(), 3);
        assert_eq!(mapper.label_index("DT")?, 0);
        assert_eq!(mapper.label_index("VBZ")?, 2);
        assert_eq!(mapper.label(1), Some("NN"));
        assert!(mapper.label_index("JJ").is_err());
        Ok(())
    }

    #[test]
    fn test_min_frequency_drops_rare_words() -> Result<()> {
        let mapper = build(UnknownPolicy::Plain, 2)?;

        assert_eq!(mapper.tokens_dim(), 2);
        assert_eq!(mapper.token(1), Some("The"));
        assert_eq!(mapper.token_index("dog"), 0);
        Ok(())
    }

    #[test]
    fn test_category_mapping_layout() -> Result<()> {
        let mapper = build(UnknownPolicy::Categories, 0)?;

        assert_eq!(mapper.token_index(BEGIN), 0);
        assert_eq!(mapper.token_index(END), 1);
        assert_eq!(mapper.token_index("twoDigitNum"), 2);
        assert_eq!(mapper.token_index(UNK), 17);
        assert_eq!(mapper.token_index("The"), 18);
        assert_eq!(mapper.tokens_dim(), 22);
        Ok(())
    }

    #[test]
    fn test_unknown_categories() -> Result<()> {
        let mapper = build(UnknownPolicy::Categories, 0)?;
        let category = |w: &str| mapper.token(mapper.token_index(w)).map(str::to_string);

        assert_eq!(category("42").as_deref(), Some("twoDigitNum"));
        assert_eq!(category("1999").as_deref(), Some("fourDigitNum"));
        assert_eq!(category("05").as_deref(), Some("otherNum"));
        assert_eq!(category("A4").as_deref(), Some("containsDigitAndAlpha"));
        assert_eq!(category("10-12").as_deref(), Some("containsDigitAndDash"));
        assert_eq!(category("3/4").as_deref(), Some("containsDigitAndSlash"));
        assert_eq!(category("1,000").as_deref(), Some("containsDigitAndComma"));
        assert_eq!(category("3.14").as_deref(), Some("containsDigitAndPeriod"));
        assert_eq!(category("NASA").as_deref(), Some("allCaps"));
        assert_eq!(category("Mr").as_deref(), Some("initCap"));
        assert_eq!(category("zebra").as_deref(), Some("lowerCase"));
        assert_eq!(category("?").as_deref(), Some("punkMark"));
        assert_eq!(category("@@").as_deref(), Some("containsNonAlphaNumeric"));
        Ok(())
    }

    #[test]
    fn test_json_round_trip() -> Result<()> {
        let mapper = build(UnknownPolicy::Categories, 1)?;
        let restored = TokenMapper::from_json(mapper.to_json()?)?;

        assert_eq!(restored, mapper);
        assert_eq!(restored.token_index("1999"), mapper.token_index("1999"));
        Ok(())
    }

    #[test]
    fn test_malformed_line_is_rejected() {
        let mut mapper = TokenMapper::default();
        let result = mapper.create_mapping_from_reader(Cursor::new("word-without-label\n"));
        assert!(matches!(result, Err(TaggerError::DataLoad(_))));
    }
}
