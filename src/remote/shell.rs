use std::borrow::Cow;

use shell_escape::unix::escape;

/// Quote a single argument for interpolation into a remote shell command.
pub fn quote(arg: &str) -> String {
    escape(Cow::Borrowed(arg)).into_owned()
}

/// Substitute `{name}` placeholders in a command template with quoted values.
pub fn render_command(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |command, (name, value)| {
        command.replace(&format!("{{{}}}", name), &quote(value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain_path_untouched() {
        assert_eq!(quote("/etc/nginx/managed.d/site_1.conf"), "/etc/nginx/managed.d/site_1.conf");
    }

    #[test]
    fn test_quote_special_characters() {
        let quoted = quote("/tmp/a b;rm -rf /");
        assert!(quoted.starts_with('\''));
        assert!(quoted.ends_with('\''));
    }

    #[test]
    fn test_render_command() {
        assert_eq!(
            render_command("nginx -t -c {path}", &[("path", "/tmp/nginx_test_abc.conf")]),
            "nginx -t -c /tmp/nginx_test_abc.conf"
        );
    }
}
