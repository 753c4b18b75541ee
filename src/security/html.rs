use ammonia::Builder;
use once_cell::sync::Lazy;
use std::collections::HashSet;

static TEXT_ONLY: Lazy<Builder<'static>> = Lazy::new(|| {
    let mut builder = Builder::default();
    builder.tags(HashSet::new());
    builder
});

/// Reduces untrusted input to escaped text.
///
/// Every tag is stripped and the contents of `<script>` and `<style>` are
/// dropped entirely. The output is HTML-escaped, so it can be placed inside
/// an HTML body as-is but should not be shown as plain text.
pub fn text_only(input: &str) -> String {
    TEXT_ONLY.clean(input).to_string()
}

/// Escapes text for use inside HTML markup.
pub fn escape(input: &str) -> String {
    ammonia::clean_text(input)
}
