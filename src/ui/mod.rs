//! Server-rendered HTML.
//!
//! Pages are plain strings; the chat page carries a small script that follows
//! the room's event stream and posts messages back.

mod message;
mod page;

pub use message::{escape_html, render_message};
pub use page::{ai_toggle, chat_page, html_shell, login_page};
