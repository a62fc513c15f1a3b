//! Chat bubble markup.

use crate::room::{ChatPayload, MessageKind};

/// Escape text for use in HTML content and double-quoted attributes.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render one message as seen by the viewer with `viewer_email`.
///
/// The viewer's own messages sit on the right under "You"; everything else
/// sits on the left with the author's avatar.
pub fn render_message(payload: &ChatPayload, viewer_email: &str) -> String {
    let own = payload.email == viewer_email;
    let bubble = match (payload.kind(), own) {
        (MessageKind::Ai, _) => "bg-purple-700",
        (MessageKind::System, _) => "bg-gray-700",
        (MessageKind::User, true) => "bg-blue-600",
        (MessageKind::User, false) => "bg-neutral-800",
    };
    let (align, justify) = if own {
        ("items-end", "justify-end")
    } else {
        ("items-start", "justify-start")
    };
    let label = if own {
        "You".to_string()
    } else {
        escape_html(&payload.user)
    };
    let avatar = payload.avatar.as_deref().map_or_else(String::new, |src| {
        let side = if own { "ml-2" } else { "mr-2" };
        format!(
            r#"<img src="{}" alt="pfp" class="w-9 h-9 rounded-full {side}">"#,
            escape_html(src)
        )
    });
    let (before, after) = if own {
        (String::new(), avatar)
    } else {
        (avatar, String::new())
    };

    format!(
        r#"<div class="w-full my-1.5 flex flex-col {align}" data-timestamp="{ts}">
    <span class="text-xs text-gray-400 mb-1 ml-11 mr-1">{label}</span>
    <div class="w-full flex items-start {justify}">
        {before}<div class="max-w-[70%] px-4 pb-2 pt-1.5 rounded-4xl break-words {bubble}"><p>{text}</p></div>{after}
    </div>
</div>"#,
        ts = escape_html(&payload.timestamp),
        text = escape_html(&payload.message),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::User;

    fn user(email: &str, name: &str) -> User {
        User {
            id: email.into(),
            email: email.into(),
            name: Some(name.into()),
            avatar_url: Some(format!("https://example.com/{name}.png")),
        }
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<script>alert("x" & 'y')</script>"#),
            "&lt;script&gt;alert(&quot;x&quot; &amp; &#39;y&#39;)&lt;/script&gt;"
        );
    }

    #[test]
    fn test_own_message() {
        let payload = ChatPayload::from_user(&user("ada@example.com", "Ada"), "hi");
        let html = render_message(&payload, "ada@example.com");
        assert!(html.contains(">You<"));
        assert!(html.contains("items-end"));
        assert!(html.contains("bg-blue-600"));
        // Avatar after the bubble.
        assert!(html.find("<p>hi</p>").unwrap() < html.find("<img").unwrap());
    }

    #[test]
    fn test_other_message() {
        let payload = ChatPayload::from_user(&user("bob@example.com", "Bob"), "yo");
        let html = render_message(&payload, "ada@example.com");
        assert!(html.contains(">Bob<"));
        assert!(html.contains("items-start"));
        assert!(html.contains("bg-neutral-800"));
        assert!(html.find("<img").unwrap() < html.find("<p>yo</p>").unwrap());
    }

    #[test]
    fn test_ai_and_system_colours() {
        let ai = render_message(&ChatPayload::assistant("beep"), "ada@example.com");
        assert!(ai.contains("bg-purple-700"));
        assert!(ai.contains(">AI Assistant<"));

        let sys = render_message(&ChatPayload::system("note"), "ada@example.com");
        assert!(sys.contains("bg-gray-700"));
    }

    #[test]
    fn test_message_text_is_escaped() {
        let payload = ChatPayload::from_user(&user("bob@example.com", "<b>Bob</b>"), "<img src=x>");
        let html = render_message(&payload, "ada@example.com");
        assert!(html.contains("&lt;img src=x&gt;"));
        assert!(html.contains("&lt;b&gt;Bob&lt;/b&gt;"));
        assert!(!html.contains("<b>"));
    }
}
