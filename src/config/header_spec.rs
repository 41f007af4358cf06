//! Header spec parsing.
//!
//! # Responsibilities
//! - Parse `name:value, name:value` strings for set/add rules
//! - Parse `name, name` strings for delete rules
//!
//! # Design Decisions
//! - Lenient: malformed segments are dropped, never fatal
//! - Order of the input is preserved

/// Parse comma-separated `name:value` pairs.
///
/// A segment without exactly one `:` is dropped, as is a segment whose name is
/// empty after trimming.
pub fn parse_header_pairs(s: &str) -> Vec<(String, String)> {
    let s = s.trim();
    if s.is_empty() {
        return Vec::new();
    }

    s.split(',')
        .filter_map(|segment| {
            let mut parts = segment.split(':');
            let (name, value) = (parts.next()?, parts.next()?);
            if parts.next().is_some() {
                return None;
            }
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Parse a comma-separated list of header names.
pub fn parse_header_names(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(name: &str, value: &str) -> (String, String) {
        (name.to_string(), value.to_string())
    }

    #[test]
    fn test_parse_pairs() {
        assert_eq!(
            parse_header_pairs("a:b, c:d"),
            vec![pair("a", "b"), pair("c", "d")]
        );
    }

    #[test]
    fn test_parse_pairs_drops_malformed() {
        assert!(parse_header_pairs("a:b:c").is_empty());
        assert_eq!(
            parse_header_pairs("x-a:1,broken,x-b:2:3, x-c : 3 "),
            vec![pair("x-a", "1"), pair("x-c", "3")]
        );
        assert_eq!(parse_header_pairs(":v,x:"), vec![pair("x", "")]);
    }

    #[test]
    fn test_parse_pairs_empty() {
        assert!(parse_header_pairs("").is_empty());
        assert!(parse_header_pairs("   ").is_empty());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(
            parse_header_names(" server , x-powered-by,,"),
            vec!["server".to_string(), "x-powered-by".to_string()]
        );
        assert!(parse_header_names("").is_empty());
    }
}
