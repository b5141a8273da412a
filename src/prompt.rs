//! Prompt templating for article generation.
//!
//! Templates use `{{name}}` placeholders drawn from a closed set. Anything
//! the renderer does not recognize, including unterminated braces, is copied
//! through untouched so older binaries keep working with newer templates.

use crate::models::{Language, Settings};

pub const DEFAULT_TEMPLATE_EN: &str = "Write a comprehensive, original blog article titled \"{{title}}\" for {{siteName}}. \
{{siteDescription}}\n\nWrite it in {{language}}, in {{paragraphs}} paragraphs of roughly {{wordsPerParagraph}} words each. \
Naturally work in these keywords: {{keywords}}. Use descriptive subheadings, keep the tone informative and \
engaging, and finish with a short conclusion.";

pub const DEFAULT_TEMPLATE_AR: &str = "اكتب مقالاً أصلياً وشاملاً بعنوان \"{{title}}\" لموقع {{siteName}}. \
{{siteDescription}}\n\nاكتب المقال باللغة {{language}} في {{paragraphs}} فقرات، كل فقرة حوالي {{wordsPerParagraph}} كلمة. \
استخدم الكلمات المفتاحية التالية بشكل طبيعي: {{keywords}}. استخدم عناوين فرعية واضحة واختم بخلاصة قصيرة.";

/// Values available to a template.
#[derive(Debug, Clone)]
pub struct PromptVars<'a> {
    pub title: &'a str,
    pub keywords: &'a [String],
    pub paragraphs: u32,
    pub words_per_paragraph: u32,
    pub language: Language,
    pub site_name: Option<&'a str>,
    pub site_description: Option<&'a str>,
}

impl PromptVars<'_> {
    fn lookup(&self, name: &str) -> Option<String> {
        let value = match name {
            "title" => self.title.to_string(),
            "keywords" => join_keywords(self.keywords, self.language),
            "paragraphs" => self.paragraphs.to_string(),
            "wordsPerParagraph" => self.words_per_paragraph.to_string(),
            "language" => language_label(self.language).to_string(),
            "siteName" => self.site_name.unwrap_or_default().to_string(),
            "siteDescription" => self.site_description.unwrap_or_default().to_string(),
            _ => return None,
        };
        Some(value)
    }
}

fn language_label(language: Language) -> &'static str {
    match language {
        Language::Ar => "العربية",
        Language::En => "English",
    }
}

/// Join keywords with the comma used by the target language.
pub fn join_keywords(keywords: &[String], language: Language) -> String {
    let separator = match language {
        Language::Ar => "، ",
        Language::En => ", ",
    };
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Fill every recognized `{{placeholder}}` in `template`.
pub fn render(template: &str, vars: &PromptVars<'_>) -> String {
    let mut out = String::with_capacity(template.len() + 64);
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        let Some(close) = after_open.find("}}") else {
            // Unterminated placeholder
            out.push_str(&rest[open..]);
            return out;
        };

        let name = after_open[..close].trim();
        match vars.lookup(name) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after_open[close + 2..];
    }

    out.push_str(rest);
    out
}

/// The template to use for these settings, falling back to the built-in one.
pub fn effective_template(settings: &Settings) -> &str {
    if !settings.prompt_template.trim().is_empty() {
        return &settings.prompt_template;
    }
    match settings.language {
        Language::Ar => DEFAULT_TEMPLATE_AR,
        Language::En => DEFAULT_TEMPLATE_EN,
    }
}

/// Build the full generation prompt: the rendered template followed by the
/// output contract the response parser expects.
pub fn build_request(settings: &Settings, title: &str, site_name: &str, site_description: &str) -> String {
    let vars = PromptVars {
        title,
        keywords: &settings.target_keywords,
        paragraphs: settings.number_of_paragraphs,
        words_per_paragraph: settings.average_words_per_paragraph,
        language: settings.language,
        site_name: Some(site_name),
        site_description: Some(site_description),
    };
    let body = render(effective_template(settings), &vars);

    format!(
        "{body}\n\n\
         Respond with a single JSON object and nothing else, using these fields:\n\
         - \"title\": the final article title\n\
         - \"content\": the article body in Markdown, written in {language}\n\
         - \"metaTitle\": an SEO title under 60 characters\n\
         - \"metaDescription\": an SEO description under 160 characters\n\
         - \"keywords\": an array of 5-10 SEO keywords in {language}",
        language = settings.language.display_name(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars<'a>(keywords: &'a [String], language: Language) -> PromptVars<'a> {
        PromptVars {
            title: "Rust in Production",
            keywords,
            paragraphs: 4,
            words_per_paragraph: 150,
            language,
            site_name: Some("Example"),
            site_description: None,
        }
    }

    #[test]
    fn substitutes_every_occurrence() {
        let keywords = vec!["rust".to_string(), "tokio".to_string()];
        let out = render(
            "{{title}} / {{ title }} - {{paragraphs}}x{{wordsPerParagraph}} [{{keywords}}] {{language}} {{siteName}}",
            &vars(&keywords, Language::En),
        );
        assert_eq!(
            out,
            "Rust in Production / Rust in Production - 4x150 [rust, tokio] English Example"
        );
    }

    #[test]
    fn unknown_placeholders_are_left_verbatim() {
        let out = render("{{title}} {{audience}} {{ }}", &vars(&[], Language::En));
        assert_eq!(out, "Rust in Production {{audience}} {{ }}");
    }

    #[test]
    fn unterminated_placeholder_passes_through() {
        let out = render("Hello {{title", &vars(&[], Language::En));
        assert_eq!(out, "Hello {{title");
    }

    #[test]
    fn missing_optional_site_fields_render_empty() {
        let out = render("[{{siteDescription}}]", &vars(&[], Language::En));
        assert_eq!(out, "[]");
    }

    #[test]
    fn arabic_keywords_use_arabic_comma() {
        let keywords = vec!["برمجة".to_string(), " ".to_string(), "راست".to_string()];
        assert_eq!(join_keywords(&keywords, Language::Ar), "برمجة، راست");
    }

    #[test]
    fn empty_template_falls_back_to_default() {
        let settings = Settings {
            language: Language::En,
            ..Settings::default()
        };
        let prompt = build_request(&settings, "Hello", "Site", "About");
        assert!(prompt.contains("titled \"Hello\" for Site"));
        assert!(prompt.contains("\"metaDescription\""));
        assert!(!prompt.contains("{{"));
    }
}
