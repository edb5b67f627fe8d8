use std::fmt;

/// Try to get a keyword from a string, ignoring string casing.
pub fn keyword_from_str(s: &str) -> Option<Keyword> {
    let s = unicase::Ascii::new(s);
    let idx = match KEYWORD_STRINGS.binary_search(&s) {
        Ok(idx) => idx,
        Err(_) => return None,
    };
    Some(ALL_KEYWORDS[idx])
}

/// Maximum edit distance for a keyword to be suggested.
const MAX_SUGGESTION_DISTANCE: usize = 3;

/// Maximum number of keyword suggestions returned.
const MAX_SUGGESTIONS: usize = 3;

/// Find keywords similar to `word`, closest first.
///
/// A keyword is a candidate when its Levenshtein distance to `word` is at most
/// 3 and smaller than the length of `word`. Ties are broken alphabetically.
pub fn suggest_keywords(word: &str) -> Vec<Keyword> {
    let lower = word.to_ascii_lowercase();
    let len = lower.chars().count();

    let mut candidates: Vec<(usize, Keyword)> = ALL_KEYWORDS
        .iter()
        .filter_map(|kw| {
            let dist = strsim::levenshtein(&lower, &kw.as_str().to_ascii_lowercase());
            if dist <= MAX_SUGGESTION_DISTANCE && dist < len {
                Some((dist, *kw))
            } else {
                None
            }
        })
        .collect();

    candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.as_str().cmp(b.1.as_str())));
    candidates
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, kw)| kw)
        .collect()
}

/// Keywords tied for the smallest edit distance to `word`.
pub fn closest_keywords(word: &str) -> Vec<Keyword> {
    let lower = word.to_ascii_lowercase();
    let distance = |kw: &Keyword| strsim::levenshtein(&lower, &kw.as_str().to_ascii_lowercase());

    let suggestions = suggest_keywords(word);
    let best = match suggestions.first() {
        Some(kw) => distance(kw),
        None => return Vec::new(),
    };
    suggestions
        .into_iter()
        .filter(|kw| distance(kw) == best)
        .collect()
}

/// Generate an enum of keywords.
macro_rules! define_keywords {
    ($($ident:ident),*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Keyword {
            $($ident),*
        }

        impl Keyword {
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Keyword::$ident => stringify!($ident)),*
                }
            }
        }

        pub const ALL_KEYWORDS: &'static [Keyword] = &[
            $(Keyword::$ident),*
        ];

        pub const KEYWORD_STRINGS: &'static [unicase::Ascii<&'static str>] = &[
            $(unicase::Ascii::new(stringify!($ident)),)*
        ];
    };
}

// Must stay sorted, lookups binary search.
#[rustfmt::skip]
define_keywords!(
    ALL,
    AND,
    APPLY,
    AS,
    ASC,
    BY,
    CASE,
    CROSS,
    DESC,
    ELSE,
    END,
    EXCEPT,
    FALSE,
    FOR,
    FROM,
    GROUP,
    HAVING,
    IN,
    INNER,
    INTERSECT,
    IS,
    JOIN,
    LEFT,
    LIKE,
    NOT,
    NULL,
    ON,
    OR,
    ORDER,
    OUTER,
    PIVOT,
    RIGHT,
    RLIKE,
    SELECT,
    SKIP,
    TAKE,
    THEN,
    TRUE,
    UNION,
    WHEN,
    WHERE,
    WITH
);

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive() {
        // (input, expected)
        let tests = [
            ("select", Some(Keyword::SELECT)),
            ("SeLeCt", Some(Keyword::SELECT)),
            ("SELECT", Some(Keyword::SELECT)),
            ("NOSELECT", None),
            ("order", Some(Keyword::ORDER)),
            ("rlike", Some(Keyword::RLIKE)),
            ("with", Some(Keyword::WITH)),
        ];

        for (input, expected) in tests {
            let got = keyword_from_str(input);
            assert_eq!(expected, got, "input: {input}");
        }
    }

    #[test]
    fn keywords_sorted() {
        for pair in KEYWORD_STRINGS.windows(2) {
            assert!(pair[0] < pair[1], "{:?} >= {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn suggestions() {
        assert_eq!(Keyword::SELECT, suggest_keywords("selec")[0]);
        assert_eq!(Keyword::FROM, suggest_keywords("frm")[0]);
        assert_eq!(Keyword::WHERE, suggest_keywords("whre")[0]);
    }

    #[test]
    fn closest_includes_ties() {
        let closest = closest_keywords("wher");
        assert!(closest.contains(&Keyword::WHEN));
        assert!(closest.contains(&Keyword::WHERE));
        assert!(closest_keywords("abracadabra").is_empty());
    }

    #[test]
    fn suggestions_bounded() {
        // Too far from anything.
        assert!(suggest_keywords("abracadabra").is_empty());
        // Distance must be smaller than the input length.
        assert!(suggest_keywords("x").is_empty());
        assert!(suggest_keywords("selct").len() <= 3);
    }
}
