use std::fmt::Display;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything outside the RFC 3986 unreserved set gets escaped
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode a single path segment
pub fn encode_component(segment: &str) -> String {
    utf8_percent_encode(segment, COMPONENT).to_string()
}

/// Encode each part and join them with `/`
pub fn join<I>(parts: I) -> String
where
    I: IntoIterator,
    I::Item: Display,
{
    parts
        .into_iter()
        .map(|part| encode_component(&part.to_string()))
        .collect::<Vec<_>>()
        .join("/")
}

/// As [`join`], with a trailing `/` marking a collection
pub fn join_dir<I>(parts: I) -> String
where
    I: IntoIterator,
    I::Item: Display,
{
    let mut path = join(parts);
    path.push('/');
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreserved_characters_pass_through() {
        assert_eq!(encode_component("Az09-._~"), "Az09-._~");
    }

    #[test]
    fn reserved_characters_are_escaped() {
        assert_eq!(encode_component("a b/c@d"), "a%20b%2Fc%40d");
        assert_eq!(encode_component("é"), "%C3%A9");
    }

    #[test]
    fn join_encodes_each_part() {
        assert_eq!(
            join(["v2", "acl", "kerberos", "svc/host@REALM"]),
            "v2/acl/kerberos/svc%2Fhost%40REALM"
        );
        assert_eq!(join_dir(["v1", "app"]), "v1/app/");
    }
}
