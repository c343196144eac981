// src/utils/html.rs

/// Strips unsafe markup from free text written by users or reviewers.
///
/// Whitelist based: harmless tags like `<b>` survive, `<script>` is removed
/// together with its content, event-handler attributes are dropped.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

#[cfg(test)]
mod tests {
    use super::clean_html;

    #[test]
    fn removes_scripts_keeps_text() {
        assert_eq!(clean_html("Nile<script>alert(1)</script>"), "Nile");
        assert_eq!(clean_html("the <b>Nile</b>"), "the <b>Nile</b>");
    }
}
