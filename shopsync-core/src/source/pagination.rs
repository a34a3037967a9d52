//! RFC 8288 `Link` header parsing for cursor-based pagination.

/// One `<url>; rel="..."` entry of a `Link` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkValue {
    pub url: String,
    pub rels: Vec<String>,
}

impl LinkValue {
    pub fn has_rel(&self, rel: &str) -> bool {
        self.rels.iter().any(|r| r.eq_ignore_ascii_case(rel))
    }
}

/// Parse every link-value in a `Link` header.
///
/// Commas inside `<...>` do not split entries. Entries without a
/// bracketed URL are skipped.
pub fn parse_link_header(header: &str) -> Vec<LinkValue> {
    split_link_values(header)
        .into_iter()
        .filter_map(parse_link_value)
        .collect()
}

/// The `rel="next"` URL, if the header carries one.
pub fn next_link(header: &str) -> Option<String> {
    parse_link_header(header)
        .into_iter()
        .find(|link| link.has_rel("next"))
        .map(|link| link.url)
}

fn split_link_values(header: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_url = false;
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in header.char_indices() {
        match c {
            '<' if !in_quotes => in_url = true,
            '>' if !in_quotes => in_url = false,
            '"' if !in_url => in_quotes = !in_quotes,
            ',' if !in_url && !in_quotes => {
                parts.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&header[start..]);
    parts
}

fn parse_link_value(part: &str) -> Option<LinkValue> {
    let part = part.trim();
    let open = part.find('<')?;
    let close = open + part[open..].find('>')?;
    let url = part[open + 1..close].trim().to_string();
    if url.is_empty() {
        return None;
    }

    let mut rels = Vec::new();
    for param in part[close + 1..].split(';') {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("rel") {
            let value = value.trim().trim_matches('"');
            rels.extend(value.split_whitespace().map(str::to_string));
        }
    }
    Some(LinkValue { url, rels })
}
