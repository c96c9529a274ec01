//! Fixed answering rules that never involve the oracle.

/// Words that mark a voluntary self-identification question.
const DEMOGRAPHIC_KEYWORDS: [&str; 12] = [
    "gender",
    "race",
    "ethnicity",
    "ethnic",
    "hispanic",
    "latino",
    "veteran",
    "disability",
    "disabled",
    "sexual orientation",
    "transgender",
    "pronoun",
];

/// Option texts meaning "decline to answer", most specific first. The trailing
/// stems catch wordings such as "I prefer not to disclose".
const DECLINE_PHRASES: [&str; 10] = [
    "decline to self-identify",
    "prefer not to say",
    "prefer not to answer",
    "decline to answer",
    "decline",
    "prefer not",
    "choose not",
    "do not wish",
    "don't wish",
    "not to disclose",
];

pub const MAX_ANSWER_CHARS: usize = 500;

pub fn is_demographic(question: &str) -> bool {
    let lower = question.to_lowercase();
    DEMOGRAPHIC_KEYWORDS.iter().any(|kw| {
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == *kw)
            || (kw.contains(' ') && lower.contains(kw))
    })
}

/// The option that declines, if the control offers one.
pub fn decline_option(options: &[String]) -> Option<&String> {
    DECLINE_PHRASES.iter().find_map(|phrase| {
        options
            .iter()
            .find(|option| option.to_lowercase().replace('\u{2019}', "'").contains(phrase))
    })
}

/// Stock answers for common open questions. Used when the oracle cannot help.
pub fn canned_answer(question: &str) -> Option<&'static str> {
    let lower = question.to_lowercase();
    if lower.contains("why") && ["work", "join", "interested"].iter().any(|kw| lower.contains(kw)) {
        return Some(
            "I am excited about this opportunity because it aligns with my skills and career goals. \
             I believe I can contribute significantly to the team's success.",
        );
    }
    if lower.contains("cover letter") {
        return Some("Please see attached cover letter document.");
    }
    if lower.contains("additional") || lower.contains("comments") {
        return Some(
            "Thank you for considering my application. I look forward to discussing this opportunity further.",
        );
    }
    None
}

/// Truncates on a char boundary.
pub fn truncate_answer(answer: &str, max_chars: usize) -> String {
    answer.trim().chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_demographic_matches_whole_words() {
        assert!(is_demographic("What is your Gender?"));
        assert!(is_demographic("Are you a protected veteran"));
        assert!(is_demographic("Sexual orientation (optional)"));
        assert!(!is_demographic("Describe your tracing experience"));
        assert!(!is_demographic("Why do you want to work here?"));
    }

    #[test]
    fn test_decline_option_prefers_specific_phrase() {
        let options = vec![
            "Male".to_string(),
            "Female".to_string(),
            "Decline to self-identify".to_string(),
        ];
        assert_eq!(decline_option(&options).map(String::as_str), Some("Decline to self-identify"));
        assert!(decline_option(&["Yes".to_string(), "No".to_string()]).is_none());
    }

    #[test]
    fn test_decline_option_matches_stems() {
        for wording in [
            "I prefer not to disclose",
            "I choose not to answer",
            "I don't wish to disclose",
            "I don\u{2019}t wish to answer",
            "I do not wish to provide this information",
        ] {
            let options = vec!["Yes".to_string(), wording.to_string(), "No".to_string()];
            assert_eq!(decline_option(&options).map(String::as_str), Some(wording), "{wording}");
        }
    }

    #[test]
    fn test_canned_answer() {
        assert!(canned_answer("Why are you interested in joining?").is_some());
        assert_eq!(
            canned_answer("Upload or paste your cover letter"),
            Some("Please see attached cover letter document.")
        );
        assert!(canned_answer("Desired salary").is_none());
    }

    #[test]
    fn test_truncate_answer_respects_char_boundaries() {
        let long = "é".repeat(600);
        let truncated = truncate_answer(&long, MAX_ANSWER_CHARS);
        assert_eq!(truncated.chars().count(), 500);
    }
}
