use minijinja::{context, Environment, UndefinedBehavior};

/// Values a broadcast message can reference, e.g. `Hi {{ first_name }}`.
pub struct RecipientContext<'a> {
    pub name: &'a str,
    pub phone: &'a str,
}

/// Personalize a broadcast text for one recipient.
///
/// Messages without template syntax pass through untouched; a template that
/// fails to compile or render falls back to the raw text.
pub fn render_broadcast_message(template: &str, ctx: &RecipientContext<'_>) -> String {
    if !template.contains("{{") && !template.contains("{%") {
        return template.to_string();
    }

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Lenient);
    if env.add_template("broadcast", template).is_err() {
        return template.to_string();
    }
    let Ok(compiled) = env.get_template("broadcast") else {
        return template.to_string();
    };

    let name = ctx.name.trim();
    let first_name = name.split_whitespace().next().unwrap_or_default();
    compiled
        .render(context! {
            name => name,
            first_name => first_name,
            phone => ctx.phone,
        })
        .unwrap_or_else(|err| {
            tracing::debug!(error = %err, "broadcast template render failed; sending raw text");
            template.to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(name: &'a str) -> RecipientContext<'a> {
        RecipientContext {
            name,
            phone: "5511999990000",
        }
    }

    #[test]
    fn test_placeholders_are_filled() {
        let text = render_broadcast_message(
            "Hi {{ first_name }}, your number is {{ phone }}",
            &ctx("Ana Souza"),
        );
        assert_eq!(text, "Hi Ana, your number is 5511999990000");
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(render_broadcast_message("Sale today", &ctx("Ana")), "Sale today");
    }

    #[test]
    fn test_broken_template_falls_back_to_raw_text() {
        let raw = "Hi {{ name ";
        assert_eq!(render_broadcast_message(raw, &ctx("Ana")), raw);
    }

    #[test]
    fn test_missing_name_uses_fallback() {
        let text = render_broadcast_message("Hi {{ name or 'there' }}", &ctx(""));
        assert_eq!(text, "Hi there");
    }
}
