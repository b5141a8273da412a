use crate::error::ParseError;
use crate::models::{ParsedArticle, RawDraft, Seo};

const META_DESCRIPTION_CHARS: usize = 160;

/// Wrapper tags some providers put around the whole body.
const WRAPPER_TAGS: &[&str] = &["html", "body", "article", "main"];

/// Validate and normalize a provider draft.
pub fn parse(raw: RawDraft) -> Result<ParsedArticle, ParseError> {
    let title = raw
        .title
        .as_deref()
        .map(normalize_title)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ParseError::MalformedOutput("missing title".to_string()))?;

    let body = raw
        .body
        .as_deref()
        .map(|b| normalize_body(b, &title))
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ParseError::MalformedOutput("missing body".to_string()))?;

    let meta_title = raw
        .meta_title
        .as_deref()
        .map(collapse_whitespace)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| title.clone());

    let meta_description = raw
        .meta_description
        .as_deref()
        .map(collapse_whitespace)
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| summarize(&body, META_DESCRIPTION_CHARS));

    Ok(ParsedArticle {
        title,
        body,
        seo: Seo {
            meta_title,
            meta_description,
            keywords: dedup_keywords(&raw.keywords),
        },
    })
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_title(raw: &str) -> String {
    let stripped = strip_tags(raw);
    let title = collapse_whitespace(&stripped);
    let title = title.trim_start_matches('#').trim();
    title
        .trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”' | '«' | '»' | '*'))
        .trim()
        .to_string()
}

fn normalize_body(raw: &str, title: &str) -> String {
    let mut body = raw.replace("\r\n", "\n").replace('\r', "\n");
    body = strip_code_fence(body.trim()).to_string();
    for tag in WRAPPER_TAGS {
        body = strip_wrapper(&body, tag);
    }

    // Drop a leading heading that only repeats the title
    let trimmed = body.trim_start();
    if let Some(first_line) = trimmed.lines().next()
        && first_line.starts_with('#')
        && normalize_title(first_line) == title
    {
        body = trimmed[first_line.len()..].to_string();
    }

    let mut out = String::with_capacity(body.len());
    let mut blank_run = 0;
    for line in body.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Skip the info string (```markdown, ```html, ...)
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => return s,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn strip_wrapper(s: &str, tag: &str) -> String {
    let trimmed = s.trim();
    let lower = trimmed.to_ascii_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    if !lower.starts_with(&open) || !lower.ends_with(&close) {
        return trimmed.to_string();
    }
    let Some(open_end) = trimmed.find('>') else {
        return trimmed.to_string();
    };
    let inner_end = trimmed.len() - close.len();
    if open_end + 1 > inner_end {
        return String::new();
    }
    trimmed[open_end + 1..inner_end].trim().to_string()
}

/// Remove `<tag>`-shaped runs. A `<` that does not open a tag is text.
fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let opens_tag = after
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!');
        match after.find('>') {
            Some(close) if opens_tag => rest = &after[close + 1..],
            _ => {
                out.push('<');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Plain-text prefix of a Markdown body, cut on a word boundary.
pub fn summarize(body: &str, max_chars: usize) -> String {
    let text: String = body
        .lines()
        .filter(|l| !l.trim_start().starts_with('#') && !l.trim_start().starts_with("!["))
        .map(|l| l.trim_start_matches(['>', '-', '*', ' ']))
        .collect::<Vec<_>>()
        .join(" ");
    let text = collapse_whitespace(&strip_tags(&text)).replace("**", "");

    if text.chars().count() <= max_chars {
        return text;
    }
    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind(' ') {
        Some(i) if i > 0 => format!("{}…", cut[..i].trim_end()),
        _ => format!("{cut}…"),
    }
}

/// Deduplicate keywords case-insensitively, keeping the first spelling.
pub fn dedup_keywords(keywords: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    keywords
        .iter()
        .map(|k| collapse_whitespace(k))
        .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(title: Option<&str>, body: Option<&str>) -> RawDraft {
        RawDraft {
            title: title.map(str::to_string),
            body: body.map(str::to_string),
            ..RawDraft::default()
        }
    }

    #[test]
    fn rejects_missing_or_blank_fields() {
        assert!(matches!(
            parse(draft(None, Some("body"))),
            Err(ParseError::MalformedOutput(_))
        ));
        assert!(matches!(
            parse(draft(Some("   "), Some("body"))),
            Err(ParseError::MalformedOutput(_))
        ));
        assert!(matches!(
            parse(draft(Some("Title"), Some(" \n\t "))),
            Err(ParseError::MalformedOutput(_))
        ));
        assert!(matches!(
            parse(draft(Some("Title"), Some("```html\n<body></body>\n```"))),
            Err(ParseError::MalformedOutput(_))
        ));
    }

    #[test]
    fn a_bare_less_than_is_kept_in_titles() {
        let parsed = parse(draft(Some("Why 3 < 5 matters"), Some("Body."))).unwrap();
        assert_eq!(parsed.title, "Why 3 < 5 matters");

        let parsed = parse(draft(Some("<b>Bold</b> and 1<2"), Some("Body."))).unwrap();
        assert_eq!(parsed.title, "Bold and 1<2");
    }

    #[test]
    fn strips_fences_wrappers_and_duplicate_heading() {
        let parsed = parse(draft(
            Some("  \"My   Title\" "),
            Some("```markdown\n<article>\n# My Title\n\nFirst.\n\n\n\nSecond.\r\n</article>\n```"),
        ))
        .unwrap();
        assert_eq!(parsed.title, "My Title");
        assert_eq!(parsed.body, "First.\n\nSecond.");
    }

    #[test]
    fn seo_defaults_from_content() {
        let parsed = parse(draft(Some("Title"), Some("## Intro\n\nSome **bold** text here."))).unwrap();
        assert_eq!(parsed.seo.meta_title, "Title");
        assert_eq!(parsed.seo.meta_description, "Some bold text here.");
    }

    #[test]
    fn keywords_are_deduplicated() {
        let mut raw = draft(Some("T"), Some("B"));
        raw.keywords = vec!["Rust".into(), "rust".into(), " async  io ".into(), "".into()];
        let parsed = parse(raw).unwrap();
        assert_eq!(parsed.seo.keywords, vec!["Rust", "async io"]);
    }

    #[test]
    fn summary_cuts_on_word_boundary() {
        let summary = summarize("one two three four", 9);
        assert_eq!(summary, "one two…");
    }
}
