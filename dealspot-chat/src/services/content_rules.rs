//! Content validation for outbound messages. Pure given the banned-word
//! list and the allowed link domain: no state is read or written here, the
//! caller decides what to do with a violation.

pub const MAX_MESSAGE_LENGTH: usize = 1000;

/// Longest run of one repeated character before the message counts as spam.
const MAX_REPEATED_RUN: usize = 9;

/// Uppercase-ratio screening only applies at this length or more.
const SHOUTING_MIN_LENGTH: usize = 20;
const SHOUTING_MAX_RATIO: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentViolation {
    TooLong,
    ProhibitedWord,
    RepeatedCharacters,
    ExternalLink,
    ExcessiveCaps,
}

impl std::fmt::Display for ContentViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentViolation::TooLong => {
                write!(f, "message is too long (max {MAX_MESSAGE_LENGTH} characters)")
            }
            ContentViolation::ProhibitedWord => {
                write!(f, "message contains prohibited language")
            }
            ContentViolation::RepeatedCharacters => {
                write!(f, "message looks like spam (repeated characters)")
            }
            ContentViolation::ExternalLink => {
                write!(f, "links to external sites are not allowed")
            }
            ContentViolation::ExcessiveCaps => {
                write!(f, "please avoid writing entirely in capital letters")
            }
        }
    }
}

pub struct ContentRules {
    banned_words: Vec<String>,
    allowed_link_domain: String,
}

impl ContentRules {
    pub fn new(banned_words: Vec<String>, allowed_link_domain: impl Into<String>) -> Self {
        Self {
            banned_words: banned_words.into_iter().map(|w| w.to_lowercase()).collect(),
            allowed_link_domain: allowed_link_domain.into().to_lowercase(),
        }
    }

    pub fn validate(&self, content: &str) -> Result<(), ContentViolation> {
        if content.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(ContentViolation::TooLong);
        }

        let lowered = content.to_lowercase();
        if self.banned_words.iter().any(|w| lowered.contains(w.as_str())) {
            return Err(ContentViolation::ProhibitedWord);
        }

        if has_disallowed_link(content, &self.allowed_link_domain) {
            return Err(ContentViolation::ExternalLink);
        }

        if longest_repeated_run(content) > MAX_REPEATED_RUN {
            return Err(ContentViolation::RepeatedCharacters);
        }

        if is_shouting(content) {
            return Err(ContentViolation::ExcessiveCaps);
        }

        Ok(())
    }
}

fn longest_repeated_run(content: &str) -> usize {
    let mut longest = 0;
    let mut run = 0;
    let mut last: Option<char> = None;
    for c in content.chars() {
        if Some(c) == last {
            run += 1;
        } else {
            run = 1;
            last = Some(c);
        }
        longest = longest.max(run);
    }
    longest
}

fn is_shouting(content: &str) -> bool {
    if content.chars().count() < SHOUTING_MIN_LENGTH {
        return false;
    }
    let alpha: Vec<char> = content.chars().filter(|c| c.is_alphabetic()).collect();
    if alpha.is_empty() {
        return false;
    }
    let upper = alpha.iter().filter(|c| c.is_uppercase()).count();
    (upper as f64 / alpha.len() as f64) > SHOUTING_MAX_RATIO
}

fn has_disallowed_link(content: &str, allowed_domain: &str) -> bool {
    content
        .split_whitespace()
        .filter_map(link_domain)
        .any(|domain| !domain_is_allowed(&domain, allowed_domain))
}

/// Extract the host of a link-looking token, lowercased, port stripped.
fn link_domain(token: &str) -> Option<String> {
    let rest = token
        .strip_prefix("https://")
        .or_else(|| token.strip_prefix("http://"))
        .or_else(|| {
            if token.len() > 4 && token.to_lowercase().starts_with("www.") {
                Some(token)
            } else {
                None
            }
        })?;

    let host = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .split(':')
        .next()
        .unwrap_or("");

    if host.contains('.') {
        Some(host.to_lowercase())
    } else {
        None
    }
}

fn domain_is_allowed(domain: &str, allowed: &str) -> bool {
    let domain = domain.strip_prefix("www.").unwrap_or(domain);
    domain == allowed || domain.ends_with(&format!(".{allowed}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> ContentRules {
        ContentRules::new(vec!["badword".to_string()], "dealspot.app")
    }

    #[test]
    fn plain_text_passes() {
        assert!(rules().validate("anyone seen this blender deal?").is_ok());
    }

    #[test]
    fn over_length_is_rejected() {
        let long = "a b".repeat(400);
        assert_eq!(rules().validate(&long), Err(ContentViolation::TooLong));
    }

    #[test]
    fn banned_words_are_rejected_case_insensitively() {
        assert_eq!(
            rules().validate("that seller is a BadWord honestly"),
            Err(ContentViolation::ProhibitedWord)
        );
    }

    #[test]
    fn repeated_character_runs_are_spam() {
        assert_eq!(
            rules().validate("aaaaaaaaaaaaa"),
            Err(ContentViolation::RepeatedCharacters)
        );
        // Nine in a row is still below the threshold
        assert!(rules().validate("aaaaaaaaa").is_ok());
    }

    #[test]
    fn external_links_are_rejected_allowed_domain_passes() {
        assert_eq!(
            rules().validate("grab it here http://evil.example.com/deal"),
            Err(ContentViolation::ExternalLink)
        );
        assert!(rules().validate("grab it here https://dealspot.app/deal/42").is_ok());
        assert!(rules().validate("see https://shop.dealspot.app/x").is_ok());
    }

    #[test]
    fn www_links_without_scheme_are_caught() {
        assert_eq!(
            rules().validate("check www.sketchy.biz now"),
            Err(ContentViolation::ExternalLink)
        );
    }

    #[test]
    fn lookalike_domain_suffix_is_not_allowed() {
        assert_eq!(
            rules().validate("https://notdealspot.app/x"),
            Err(ContentViolation::ExternalLink)
        );
    }

    #[test]
    fn spam_with_repeated_run_and_bad_link_is_rejected() {
        assert!(rules()
            .validate("aaaaaaaaaaaaa http://evil.example.com")
            .is_err());
    }

    #[test]
    fn shouting_is_rejected_only_past_minimum_length() {
        assert_eq!(
            rules().validate("THIS DEAL IS ABSOLUTELY INCREDIBLE BUY NOW"),
            Err(ContentViolation::ExcessiveCaps)
        );
        // Short exclamations are fine
        assert!(rules().validate("WOW NICE").is_ok());
        // Mixed case under the ratio is fine
        assert!(rules().validate("This deal is REALLY good, seriously worth it").is_ok());
    }
}
