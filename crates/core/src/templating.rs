//! Placeholder and variation expansion for reply templates.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::sync::join_emojis;

const FALLBACK_NAME: &str = "User";

/// Values available to a template at insertion time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateContext {
    pub handle: Option<String>,
    pub nickname: Option<String>,
    pub display_name: Option<String>,
    pub emojis: Vec<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Expands placeholders and picks one option from every `((a|b|c))` group.
pub fn render_template(text: &str, context: &TemplateContext) -> String {
    render_template_with(text, context, &mut rand::thread_rng())
}

pub fn render_template_with<R: Rng + ?Sized>(
    text: &str,
    context: &TemplateContext,
    rng: &mut R,
) -> String {
    let nickname = non_empty(&context.nickname)
        .or_else(|| non_empty(&context.handle))
        .unwrap_or(FALLBACK_NAME);
    let handle = non_empty(&context.handle).unwrap_or(FALLBACK_NAME);
    let display_name = non_empty(&context.display_name).unwrap_or(FALLBACK_NAME);

    let expanded = text
        .replace("{{nickname}}", nickname)
        .replace("{{handle}}", handle)
        .replace("{{displayName}}", display_name)
        .replace("{{emojis}}", &join_emojis(&context.emojis));

    expand_variations(&expanded, rng)
}

/// Replaces each `((...))` group whose body has no `)` with one of its
/// `|`-separated options. Malformed groups are left as written.
fn expand_variations<R: Rng + ?Sized>(text: &str, rng: &mut R) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("((") {
        let after_open = &rest[start + 2..];
        let body_len = after_open.find(')').unwrap_or(after_open.len());
        let closes = after_open[body_len..].starts_with("))");

        if body_len == 0 || !closes {
            out.push_str(&rest[..start + 1]);
            rest = &rest[start + 1..];
            continue;
        }

        let options: Vec<&str> = after_open[..body_len].split('|').collect();
        out.push_str(&rest[..start]);
        out.push_str(options.choose(rng).copied().unwrap_or_default());
        rest = &after_open[body_len + 2..];
    }

    out.push_str(rest);
    out
}
