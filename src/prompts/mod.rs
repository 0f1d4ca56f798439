use anyhow::{Context, Result};
use std::collections::HashMap;
use tera::{Context as TeraContext, Tera};

const SYSTEM_PROMPT: &str = include_str!("system_prompt.tera");

const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("zh", "Chinese"),
    ("en", "English"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("fr", "French"),
    ("de", "German"),
    ("es", "Spanish"),
    ("ru", "Russian"),
    ("pt", "Portuguese"),
    ("ar", "Arabic"),
];

/// English name for a language code. `zh-CN` and `zh_TW` resolve through their
/// primary subtag; unknown codes come back unchanged.
pub fn language_name(code: &str) -> String {
    let trimmed = code.trim();
    let primary = trimmed
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase();
    LANGUAGE_NAMES
        .iter()
        .find(|(key, _)| *key == primary)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Looks up the extra system-prompt text for a translation domain.
pub trait PromptSource: Send + Sync {
    fn resolve(&self, domain: &str) -> Result<Option<String>>;
}

/// Domain prompts from the `[prompts]` settings table.
#[derive(Debug, Clone, Default)]
pub struct SettingsPrompts {
    prompts: HashMap<String, String>,
}

impl SettingsPrompts {
    pub fn new(prompts: HashMap<String, String>) -> Self {
        Self { prompts }
    }
}

impl PromptSource for SettingsPrompts {
    fn resolve(&self, domain: &str) -> Result<Option<String>> {
        Ok(self
            .prompts
            .get(domain.trim())
            .map(|prompt| prompt.trim())
            .filter(|prompt| !prompt.is_empty())
            .map(str::to_string))
    }
}

pub fn render_system_prompt(
    source_lang: &str,
    target_lang: &str,
    domain_prompt: Option<&str>,
) -> Result<String> {
    let mut context = TeraContext::new();
    let source = source_lang.trim();
    let source_name = if source.is_empty() || source.eq_ignore_ascii_case("auto") {
        String::new()
    } else {
        language_name(source)
    };
    context.insert("source_name", &source_name);
    context.insert("target_name", &language_name(target_lang));
    context.insert("domain_prompt", domain_prompt.unwrap_or_default().trim());

    let rendered = Tera::one_off(SYSTEM_PROMPT, &context, false)
        .with_context(|| "failed to render system prompt")?;
    Ok(rendered.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_names_resolve_by_primary_subtag() {
        assert_eq!(language_name("zh"), "Chinese");
        assert_eq!(language_name("zh-CN"), "Chinese");
        assert_eq!(language_name("PT_br"), "Portuguese");
        assert_eq!(language_name("tlh"), "tlh");
    }

    #[test]
    fn source_language_is_named_unless_auto() {
        let auto = render_system_prompt("auto", "zh", None).expect("render");
        assert!(auto.contains("Translate the user's text into Chinese."));

        let named = render_system_prompt("ja", "en", None).expect("render");
        assert!(named.contains("Translate the user's text from Japanese into English."));
        assert!(!named.contains("Domain guidance"));
    }

    #[test]
    fn domain_prompt_is_appended() {
        let prompt = render_system_prompt("auto", "de", Some("  Keep clause numbers.  ")).expect("render");
        assert!(prompt.ends_with(
            "If the text is already in German, return it as is.\n\nDomain guidance: Keep clause numbers."
        ));
    }

    #[test]
    fn settings_prompts_skip_blank_entries() {
        let prompts = SettingsPrompts::new(HashMap::from([
            ("general".to_string(), "   ".to_string()),
            ("legal".to_string(), "Keep citations.".to_string()),
        ]));
        assert_eq!(prompts.resolve("general").expect("resolve"), None);
        assert_eq!(prompts.resolve("missing").expect("resolve"), None);
        assert_eq!(
            prompts.resolve(" legal ").expect("resolve").as_deref(),
            Some("Keep citations.")
        );
    }
}
