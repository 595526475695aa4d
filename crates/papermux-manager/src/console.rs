//! Lines typed into the server console.

/// Minecraft's own graceful shutdown command.
pub const STOP_COMMAND: &str = "stop";

#[derive(serde::Serialize)]
struct ChatComponent<'a> {
    text: &'a str,
    color: &'a str,
}

/// `tellraw` broadcast shown in red to every online player.
pub fn broadcast(text: &str) -> String {
    let component = ChatComponent { text, color: "red" };
    let json = serde_json::to_string(&component)
        .unwrap_or_else(|_| format!("{{\"text\":{text:?},\"color\":\"red\"}}"));
    format!("tellraw @a {json}")
}

pub fn shutdown_notice() -> String {
    broadcast("The server is shutting down!")
}

pub fn restart_notice(label: &str) -> String {
    broadcast(&format!("The server is restarting in {label}!"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_notice_matches_console_syntax() {
        assert_eq!(
            shutdown_notice(),
            r#"tellraw @a {"text":"The server is shutting down!","color":"red"}"#
        );
    }

    #[test]
    fn restart_notice_embeds_label() {
        assert_eq!(
            restart_notice("5 minutes"),
            r#"tellraw @a {"text":"The server is restarting in 5 minutes!","color":"red"}"#
        );
    }

    #[test]
    fn broadcast_escapes_quotes() {
        let line = broadcast(r#"say "hi""#);
        let json = line.strip_prefix("tellraw @a ").unwrap();
        let v: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(v["text"], r#"say "hi""#);
    }
}
