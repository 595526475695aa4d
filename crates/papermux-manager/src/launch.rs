use std::path::Path;

/// How the server is started inside the session's shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub exec: String,
    /// JVM arguments exactly as configured; they are typed into a shell, so
    /// any quoting in them is the operator's.
    pub jvm_args: String,
    pub jar: String,
}

pub fn resolve_launch_spec(java_command: &str, server_args: &str, jar: &Path) -> LaunchSpec {
    let jar = std::path::absolute(jar).unwrap_or_else(|_| jar.to_path_buf());
    LaunchSpec {
        exec: java_command.trim().to_string(),
        jvm_args: server_args.trim().to_string(),
        jar: jar.to_string_lossy().into_owned(),
    }
}

impl LaunchSpec {
    /// Single line typed into the pane, e.g.
    /// `/usr/bin/env java -Xmx2G -jar /srv/mc/paper-1.18-100.jar nogui`.
    pub fn command_line(&self) -> String {
        let mut parts: Vec<String> = vec![self.exec.clone()];
        if !self.jvm_args.is_empty() {
            parts.push(self.jvm_args.clone());
        }
        parts.push("-jar".to_string());
        parts.push(shell_quote(&self.jar));
        parts.push("nogui".to_string());
        parts.join(" ")
    }
}

fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | ':' | '=' | '@' | ','));
    if safe {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_has_args_jar_and_nogui() {
        let spec = resolve_launch_spec(
            "/usr/bin/env java",
            " -Xmx2G -Xms1G ",
            Path::new("/srv/mc/paper-1.18-100.jar"),
        );
        assert_eq!(
            spec.command_line(),
            "/usr/bin/env java -Xmx2G -Xms1G -jar /srv/mc/paper-1.18-100.jar nogui"
        );
    }

    #[test]
    fn empty_args_are_omitted() {
        let spec = resolve_launch_spec("java", "", Path::new("/srv/paper-1.18-1.jar"));
        assert_eq!(spec.command_line(), "java -jar /srv/paper-1.18-1.jar nogui");
    }

    #[test]
    fn relative_jar_becomes_absolute() {
        let spec = resolve_launch_spec("java", "", Path::new("./paper-1.18-100.jar"));
        assert!(Path::new(&spec.jar).is_absolute());
        assert!(spec.jar.ends_with("paper-1.18-100.jar"));
    }

    #[test]
    fn odd_paths_are_quoted() {
        assert_eq!(shell_quote("/srv/my server/p.jar"), "'/srv/my server/p.jar'");
        assert_eq!(shell_quote("/srv/it's.jar"), r"'/srv/it'\''s.jar'");
        assert_eq!(shell_quote("/srv/p.jar"), "/srv/p.jar");
    }
}
