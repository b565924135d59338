/// The forms a send-dm target can be written in, in matching priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserIdentifier {
    /// `<@123>` or `<@!123>`
    Mention(u64),
    /// `123`
    Id(u64),
    /// Legacy `name#1234`
    Tagged { name: String, discriminator: String },
    /// Bare `name`
    Name(String),
}

/// The input looked like a mention or an id but could not be read as one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid user identifier: {0}")]
pub struct InvalidIdentifier(pub String);

impl UserIdentifier {
    /// Classify `input`. The first form whose syntax matches is final.
    pub fn parse(input: &str) -> Result<Self, InvalidIdentifier> {
        let input = input.trim();

        if input.starts_with("<@") && input.ends_with('>') {
            let inner = input.trim_matches(|c| c == '<' || c == '@' || c == '!' || c == '>');
            return inner
                .parse()
                .map(UserIdentifier::Mention)
                .map_err(|_| InvalidIdentifier(input.to_string()));
        }

        if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
            return input
                .parse()
                .map(UserIdentifier::Id)
                .map_err(|_| InvalidIdentifier(input.to_string()));
        }

        if let Some((name, discriminator)) = input.split_once('#') {
            return Ok(UserIdentifier::Tagged {
                name: name.to_string(),
                discriminator: discriminator.to_string(),
            });
        }

        if input.is_empty() {
            return Err(InvalidIdentifier(input.to_string()));
        }

        Ok(UserIdentifier::Name(input.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mentions() {
        assert_eq!(UserIdentifier::parse("<@42>"), Ok(UserIdentifier::Mention(42)));
        assert_eq!(UserIdentifier::parse("<@!42>"), Ok(UserIdentifier::Mention(42)));
        assert_eq!(
            UserIdentifier::parse(" <@123456789012345678> "),
            Ok(UserIdentifier::Mention(123456789012345678))
        );
    }

    #[test]
    fn test_malformed_mention_does_not_fall_through() {
        assert!(UserIdentifier::parse("<@alice>").is_err());
        assert!(UserIdentifier::parse("<@>").is_err());
    }

    #[test]
    fn test_ids() {
        assert_eq!(UserIdentifier::parse("42"), Ok(UserIdentifier::Id(42)));
        // too large for u64
        assert!(UserIdentifier::parse("99999999999999999999999").is_err());
    }

    #[test]
    fn test_tagged_usernames() {
        assert_eq!(
            UserIdentifier::parse("alice#0420"),
            Ok(UserIdentifier::Tagged {
                name: "alice".into(),
                discriminator: "0420".into()
            })
        );
        // only the first '#' splits
        assert_eq!(
            UserIdentifier::parse("a#b#c"),
            Ok(UserIdentifier::Tagged {
                name: "a".into(),
                discriminator: "b#c".into()
            })
        );
    }

    #[test]
    fn test_bare_names() {
        assert_eq!(
            UserIdentifier::parse("alice"),
            Ok(UserIdentifier::Name("alice".into()))
        );
        assert_eq!(
            UserIdentifier::parse("user42"),
            Ok(UserIdentifier::Name("user42".into()))
        );
        assert!(UserIdentifier::parse("   ").is_err());
    }
}
