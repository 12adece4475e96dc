//! Pattern-based redaction of personal identifiers.
//!
//! Strips a querent's display name wherever a narrative addresses them:
//! openings ("Dear Alex,"), closings and mid-sentence vocatives
//! ("Remember, Alex, ..."), and sentence-initial address ("Alex, trust...").
//! Any remaining mention becomes `[name]`. Email addresses and phone numbers
//! are masked regardless of names.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref EMAIL: Regex =
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex");
    static ref PHONE: Regex =
        Regex::new(r"\+?\d[\d\s().-]{7,}\d").expect("valid phone regex");
}

/// Compiled redaction rules for one set of names.
#[derive(Debug, Clone)]
pub struct Redactor {
    rules: Vec<(Regex, &'static str)>,
}

impl Redactor {
    /// Build rules for the given names. Multi-word names are also matched by
    /// their first word. Blank names are ignored.
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        let mut variants: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            variants.push(name.to_string());
            if let Some(first) = name.split_whitespace().next() {
                if first.len() > 1 && first != name {
                    variants.push(first.to_string());
                }
            }
        }
        // Longest first so "Alex Rivera" is handled before "Alex".
        variants.sort_by_key(|v| std::cmp::Reverse(v.len()));
        variants.dedup();

        let mut rules = Vec::new();
        for variant in &variants {
            let name = regex::escape(variant);
            let patterns: [(String, &'static str); 4] = [
                // "Dear Alex," / "Hi Alex!" at the start of a line.
                (
                    format!(r"(?im)^([ \t]*)(?:dear|hi|hello|hey)\s+{name}\b\s*[,!:.]?[ \t]*"),
                    "${1}",
                ),
                // ", Alex," / ", Alex." vocatives anywhere, including closings.
                (format!(r"(?i),\s*{name}\b\s*([,.!?;:])"), "${1}"),
                // "Alex, ..." at the start of a sentence.
                (format!(r"(?im)(^|[.!?]\s+){name},\s*"), "${1}"),
                (format!(r"(?i)\b{name}\b"), "[name]"),
            ];
            for (pattern, replacement) in patterns {
                match Regex::new(&pattern) {
                    Ok(re) => rules.push((re, replacement)),
                    Err(e) => tracing::warn!(error = %e, "skipping redaction rule"),
                }
            }
        }
        Self { rules }
    }

    /// A redactor with no name rules; still masks emails and phones.
    pub fn anonymous() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (re, replacement) in &self.rules {
            out = re.replace_all(&out, *replacement).into_owned();
        }
        out = EMAIL.replace_all(&out, "[email]").into_owned();
        PHONE.replace_all(&out, "[phone]").into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opening_and_closing_forms() {
        let redactor = Redactor::new(&["Alex"]);
        let text = "Dear Alex, the Star shines on your path. Remember, Alex, the choice is yours. Take care, Alex.";
        let out = redactor.redact(text);
        assert!(!out.contains("Alex"), "{out}");
        assert!(out.starts_with("the Star"), "{out}");
        assert!(out.contains("Remember, the choice is yours."), "{out}");
        assert!(out.ends_with("Take care."), "{out}");
    }

    #[test]
    fn test_sentence_initial_and_residual() {
        let redactor = Redactor::new(&["Alex Rivera"]);
        let out = redactor.redact("Alex, trust the process. This reading is for Alex Rivera and alex alone.");
        assert!(!out.to_lowercase().contains("alex"), "{out}");
        assert!(out.starts_with("trust the process."), "{out}");
        assert!(out.contains("[name]"), "{out}");
    }

    #[test]
    fn test_name_inside_other_words_untouched() {
        let redactor = Redactor::new(&["Al"]);
        let out = redactor.redact("Always balance; Al, breathe.");
        assert!(out.starts_with("Always"), "{out}");
        assert!(out.contains("breathe"), "{out}");
        assert!(!out.contains("Al,"), "{out}");
    }

    #[test]
    fn test_contact_details_masked() {
        let out = Redactor::anonymous()
            .redact("Write to me at sam.q+tarot@example.com or call +1 (555) 010-2030.");
        assert!(out.contains("[email]"), "{out}");
        assert!(out.contains("[phone]"), "{out}");
        assert!(!out.contains("555"), "{out}");
    }

    #[test]
    fn test_blank_names_ignored() {
        let redactor = Redactor::new(&["  "]);
        assert_eq!(redactor.redact("Nothing to hide."), "Nothing to hide.");
    }
}
