//! Installer stub rendering
//!
//! The stub is the shell-script head of the installer. It finds its payload
//! by line number (`tail -n +CUT_LINE "$0"`), so the number of lines it
//! renders to must be known before substitution: `CUT_LINE` is one more than
//! the newline count of the raw template, and no substituted value may add
//! or remove a line.
//!
//! Placeholders are written `{NAME}` (ASCII letters, digits, `_`). `{{` is a
//! literal `{`; any other `{` is copied through untouched.

use super::defaults::{PLACEHOLDER_CLOUD_DIR, PLACEHOLDER_CUT_LINE, PLACEHOLDER_RUNNER};
use crate::config::ProvisionerSettings;
use crate::exceptions::TemplateError;
use crate::utils::quote;
use log::trace;
use std::collections::BTreeMap;

/// The bundled installer stub
pub const STUB_TEMPLATE: &str = include_str!("guest.sh");

/// Placeholder name -> substituted text
pub type StubVariables = BTreeMap<String, String>;

/// Rendered stub text together with the line its payload starts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedStub {
    pub text: String,
    pub cut_line: usize,
}

impl RenderedStub {
    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }
}

/// 1-based line on which the payload starts after `template` is rendered
pub fn cut_line(template: &str) -> usize {
    1 + template.bytes().filter(|&b| b == b'\n').count()
}

/// Substitute `vars` into `template`
pub fn render(template: &str, vars: &StubVariables) -> Result<String, TemplateError> {
    if !template.ends_with('\n') {
        return Err(TemplateError::MissingTrailingNewline);
    }

    let mut out = String::with_capacity(template.len() + 64);
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];

        if let Some(after) = tail.strip_prefix('{') {
            out.push('{');
            rest = after;
            continue;
        }

        let name_len = tail
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(tail.len());
        if name_len == 0 || !tail[name_len..].starts_with('}') {
            out.push('{');
            rest = tail;
            continue;
        }

        let name = &tail[..name_len];
        let value = vars
            .get(name)
            .ok_or_else(|| TemplateError::UnresolvedPlaceholder(name.to_string()))?;
        if value.contains(['\n', '\r']) {
            return Err(TemplateError::MultilineValue(name.to_string()));
        }
        out.push_str(value);
        rest = &tail[name_len + 1..];
    }
    out.push_str(rest);

    let expected = cut_line(template) - 1;
    let actual = out.bytes().filter(|&b| b == b'\n').count();
    if actual != expected {
        return Err(TemplateError::LineCountMismatch { expected, actual });
    }

    Ok(out)
}

/// Placeholder values for `settings`, with `CUT_LINE` computed from `template`
pub fn stub_variables(settings: &ProvisionerSettings, template: &str) -> StubVariables {
    let mut vars = StubVariables::new();
    vars.insert(
        PLACEHOLDER_CUT_LINE.to_string(),
        cut_line(template).to_string(),
    );
    vars.insert(
        PLACEHOLDER_CLOUD_DIR.to_string(),
        quote(&settings.guest_stage2_dir),
    );
    vars.insert(
        PLACEHOLDER_RUNNER.to_string(),
        quote(&format!("./{}", settings.stage2_script)),
    );
    vars
}

/// Render `template` for `settings`
pub fn render_stub_with(
    template: &str,
    settings: &ProvisionerSettings,
) -> Result<RenderedStub, TemplateError> {
    let vars = stub_variables(settings, template);
    trace!("🧩 Stub variables: {:?}", vars);
    Ok(RenderedStub {
        text: render(template, &vars)?,
        cut_line: cut_line(template),
    })
}

/// Render the bundled stub for `settings`
pub fn render_stub(settings: &ProvisionerSettings) -> Result<RenderedStub, TemplateError> {
    render_stub_with(STUB_TEMPLATE, settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::archive::PermissionMode;
    use std::path::PathBuf;

    fn vars(pairs: &[(&str, &str)]) -> StubVariables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn settings(dir: &str, script: &str) -> ProvisionerSettings {
        ProvisionerSettings {
            system: "web".to_string(),
            stage2_dir: PathBuf::from("build"),
            output_file: PathBuf::from("out.sh"),
            guest_stage2_dir: dir.to_string(),
            stage2_script: script.to_string(),
            permission_mode: PermissionMode::Auto,
        }
    }

    #[test]
    fn test_cut_line_counts_raw_newlines() {
        assert_eq!(cut_line("a\nb\n"), 3);
        assert_eq!(cut_line(""), 1);
        assert_eq!(cut_line(STUB_TEMPLATE), STUB_TEMPLATE.lines().count() + 1);
    }

    #[test]
    fn test_render_substitutes() {
        let out = render("x={A} y={B_2}\n", &vars(&[("A", "1"), ("B_2", "'two'")]))
            .unwrap();
        assert_eq!(out, "x=1 y='two'\n");
    }

    #[test]
    fn test_render_passes_shell_braces_through() {
        let template = "f() { echo ${{HOME}; }\nx={ A}\n{}\n";
        let out = render(template, &vars(&[])).unwrap();
        assert_eq!(out, "f() { echo ${HOME}; }\nx={ A}\n{}\n");
    }

    #[test]
    fn test_render_unresolved_placeholder() {
        let err = render("run {RUNNER}\n", &vars(&[])).unwrap_err();
        assert_eq!(
            err,
            TemplateError::UnresolvedPlaceholder("RUNNER".to_string())
        );
    }

    #[test]
    fn test_render_rejects_multiline_values() {
        let err = render("dir={CLOUD_DIR}\n", &vars(&[("CLOUD_DIR", "a\nb")]))
            .unwrap_err();
        assert_eq!(err, TemplateError::MultilineValue("CLOUD_DIR".to_string()));
    }

    #[test]
    fn test_render_requires_trailing_newline() {
        assert_eq!(
            render("echo hi", &vars(&[])).unwrap_err(),
            TemplateError::MissingTrailingNewline
        );
    }

    #[test]
    fn test_rendered_stub_line_count_matches_cut_line() {
        let stub = render_stub(&settings("/srv/it's here", "boot strap.sh"))
            .unwrap();
        let lines = stub.text.bytes().filter(|&b| b == b'\n').count();

        assert_eq!(stub.cut_line, lines + 1);
        assert!(stub.text.ends_with('\n'));
        assert!(stub.text.contains(&format!("CUT_LINE={}\n", stub.cut_line)));
        assert!(stub.text.contains("CLOUD_DIR='/srv/it'\\''s here'\n"));
        assert!(stub.text.contains("RUNNER='./boot strap.sh'\n"));
    }

    #[test]
    fn test_default_stub_values() {
        let stub = render_stub(&settings("/var/tmp/cloud-maker", "main.sh"))
            .unwrap();
        assert!(stub.text.starts_with("#!/bin/sh\n"));
        assert!(stub.text.contains("CLOUD_DIR='/var/tmp/cloud-maker'\n"));
        assert!(stub.text.contains("RUNNER='./main.sh'\n"));
        assert!(!stub.text.contains("{CUT_LINE}"));
    }

    #[test]
    fn test_custom_template() {
        let stub = render_stub_with("# {CUT_LINE}\n{RUNNER}\n", &settings("/d", "s.sh"))
            .unwrap();
        assert_eq!(stub.text, "# 3\n'./s.sh'\n");
        assert_eq!(stub.cut_line, 3);
    }
}
