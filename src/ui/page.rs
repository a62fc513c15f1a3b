//! Full pages.

use std::fmt::Write as _;

use crate::auth::Session;
use crate::chat::AiState;
use crate::room::Broadcast;

use super::message::{escape_html, render_message};

/// Generate the HTML shell for the application.
pub fn html_shell(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en" class="dark">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="description" content="Group chat with an AI assistant">
    <title>{title} - Giga Chat</title>
    <style>{STYLE}</style>
</head>
<body class="bg-neutral-950 text-white antialiased">
{content}
</body>
</html>"#,
        title = escape_html(title),
    )
}

/// Shown when there is no session.
pub fn login_page() -> String {
    html_shell(
        "Sign in",
        r#"<div class="w-full h-screen flex flex-col justify-center items-center">
    <h1 class="text-6xl font-bold mb-10">Giga Chat 🗿</h1>
    <a href="/auth/login" class="px-4 py-2 rounded cursor-pointer bg-blue-600">Sign in with Google to start chatting!</a>
</div>"#,
    )
}

/// The chat room for a signed-in user.
///
/// `cursor` is the `seq` of the newest message the room had sent when
/// `backlog` was taken; the page's stream resumes after it.
pub fn chat_page(
    session: &Session,
    online: usize,
    ai: AiState,
    backlog: &[Broadcast],
    cursor: u64,
) -> String {
    let user = &session.user;
    let name = escape_html(user.display_name());
    let avatar = user
        .avatar_url
        .as_deref()
        .map(escape_html)
        .unwrap_or_default();
    let (ai_label, ai_class) = ai_toggle(ai.enabled);
    let ai_enabled = ai.enabled;
    let (disabled, send_label) = if ai.responding {
        (" disabled", "AI thinking...")
    } else {
        ("", "Send")
    };

    let mut messages = String::new();
    for msg in backlog {
        let _ = writeln!(messages, "{}", render_message(&msg.payload, &user.email));
    }

    let content = format!(
        r#"<div class="w-full h-screen flex flex-col justify-center items-center p-4">
  <div class="w-full max-w-6xl min-h-[600px] border border-gray-500 rounded-lg">
    <div class="h-20 border-b border-gray-500 flex items-center justify-between px-4">
      <div>
        <p class="break-words">Welcome {name} 🗿</p>
        <div class="flex items-center text-gray-400"><span id="online-count">{online}</span>&nbsp;Users online <div class="w-2 h-2 bg-green-500 rounded-full ml-1.5 animate-pulse"></div></div>
      </div>
      <div id="menu" class="relative">
        <div id="menu-button" class="w-10 h-10 cursor-pointer">
          <img src="{avatar}" alt="profile" class="rounded">
        </div>
        <div id="menu-items" class="absolute right-0 opacity-0 pointer-events-none z-10 mt-1 flex flex-col gap-2">
          <button id="ai-toggle" type="button" class="cursor-pointer rounded-md px-3 py-2 {ai_class}">{ai_label}</button>
          <form method="post" action="/auth/logout">
            <button type="submit" class="cursor-pointer rounded-md px-3 py-2 bg-red-600">Signout</button>
          </form>
        </div>
      </div>
    </div>
    <div id="chat" class="h-[500px] flex flex-col p-4 overflow-y-auto text-white" data-cursor="{cursor}">
{messages}    </div>
    <p id="composer-error" class="px-4 text-xs text-red-400" hidden></p>
    <form id="composer" class="flex p-4 border-t border-gray-500" data-ai-enabled="{ai_enabled}">
      <input id="message" name="message" type="text" placeholder="Type a message..." autocomplete="off"
             class="border border-gray-500 rounded-lg p-2 w-full"{disabled}>
      <button id="send" type="submit" class="px-4 py-1 rounded-md ml-4 bg-blue-600 cursor-pointer"{disabled}>{send_label}</button>
    </form>
  </div>
</div>
<script>{SCRIPT}</script>"#
    );

    html_shell("Chat", &content)
}

/// Label and colour of the AI switch.
pub fn ai_toggle(enabled: bool) -> (&'static str, &'static str) {
    if enabled {
        ("AI: On", "bg-green-600")
    } else {
        ("AI: Off", "bg-gray-600")
    }
}

const STYLE: &str = r"
body { margin: 0; font-family: system-ui, sans-serif; background: #0a0a0a; color: #fff; }
.flex { display: flex; } .flex-col { flex-direction: column; } .items-center { align-items: center; }
.items-start { align-items: flex-start; } .items-end { align-items: flex-end; }
.justify-center { justify-content: center; } .justify-between { justify-content: space-between; }
.justify-start { justify-content: flex-start; } .justify-end { justify-content: flex-end; }
.w-full { width: 100%; } .h-screen { height: 100vh; } .max-w-6xl { max-width: 72rem; }
.overflow-y-auto { overflow-y: auto; } .relative { position: relative; } .absolute { position: absolute; }
.right-0 { right: 0; } .gap-2 { gap: .5rem; } .p-4 { padding: 1rem; } .px-4 { padding: 0 1rem; }
.rounded-full { border-radius: 9999px; } .rounded-4xl { border-radius: 2rem; } .rounded-lg { border-radius: .5rem; }
.w-9 { width: 2.25rem; } .h-9 { height: 2.25rem; } .w-10 { width: 2.5rem; } .h-10 { height: 2.5rem; }
.max-w-\[70\%\] { max-width: 70%; } .h-\[500px\] { height: 500px; } .break-words { overflow-wrap: break-word; }
.my-1\.5 { margin: .375rem 0; } .mr-2 { margin-right: .5rem; } .ml-2 { margin-left: .5rem; } .ml-4 { margin-left: 1rem; }
.text-xs { font-size: .75rem; } .text-6xl { font-size: 3.75rem; } .font-bold { font-weight: 700; }
.text-gray-400 { color: #9ca3af; } .border { border: 1px solid #6b7280; } .border-b { border-bottom: 1px solid #6b7280; }
.border-t { border-top: 1px solid #6b7280; } .opacity-0 { opacity: 0; } .pointer-events-none { pointer-events: none; }
.bg-blue-600 { background: #2563eb; } .bg-purple-700 { background: #7e22ce; } .bg-gray-700 { background: #374151; }
.bg-neutral-800 { background: #262626; } .bg-green-600 { background: #16a34a; } .bg-gray-600 { background: #4b5563; }
.bg-red-600 { background: #dc2626; } .text-red-400 { color: #f87171; } .bg-green-500 { background: #22c55e; } .w-2 { width: .5rem; } .h-2 { height: .5rem; }
a, button { color: inherit; text-decoration: none; border: 0; }
input { background: #46464640; color: inherit; } [disabled] { opacity: .5; cursor: not-allowed; }
";

/// Client glue: live stream, composer, menu and AI toggle.
const SCRIPT: &str = r#"
(() => {
  const chat = document.getElementById('chat');
  const count = document.getElementById('online-count');
  const form = document.getElementById('composer');
  const input = document.getElementById('message');
  const send = document.getElementById('send');
  const error = document.getElementById('composer-error');
  const toggle = document.getElementById('ai-toggle');
  const menu = document.getElementById('menu');
  const items = document.getElementById('menu-items');
  const scroll = () => { chat.scrollTop = chat.scrollHeight; };
  scroll();

  let aiEnabled = form.dataset.aiEnabled === 'true';

  const stream = new EventSource('/api/room/stream?after=' + chat.dataset.cursor);
  stream.addEventListener('message', (e) => {
    const data = JSON.parse(e.data);
    chat.insertAdjacentHTML('beforeend', data.html);
    scroll();
  });
  stream.addEventListener('presence', (e) => {
    count.textContent = JSON.parse(e.data).count;
  });
  stream.addEventListener('signed_out', () => {
    stream.close();
    location.reload();
  });

  const busy = (on) => {
    input.disabled = on;
    send.disabled = on;
    send.textContent = on ? (aiEnabled ? 'AI thinking...' : 'Sending...') : 'Send';
  };
  const showError = (text) => {
    error.textContent = text;
    error.hidden = !text;
  };

  form.addEventListener('submit', async (e) => {
    e.preventDefault();
    const message = input.value;
    if (!message.trim()) return;
    busy(true);
    showError('');
    try {
      const resp = await fetch('/api/messages', {
        method: 'POST',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify({ message }),
      });
      if (resp.status === 401) {
        location.reload();
        return;
      }
      if (!resp.ok) {
        const body = await resp.json().catch(() => ({}));
        showError(body.error || ('Message not sent (' + resp.status + ')'));
        return;
      }
      input.value = '';
    } catch (err) {
      showError('Message not sent: network error');
    } finally {
      busy(false);
      input.focus();
    }
  });

  const setMenu = (open) => {
    items.classList.toggle('opacity-0', !open);
    items.classList.toggle('pointer-events-none', !open);
  };
  document.getElementById('menu-button').addEventListener('click', () => {
    setMenu(items.classList.contains('opacity-0'));
  });
  document.addEventListener('mousedown', (e) => {
    if (!menu.contains(e.target)) setMenu(false);
  });

  toggle.addEventListener('click', async () => {
    const resp = await fetch('/api/ai/toggle', { method: 'POST' });
    if (!resp.ok) return;
    const state = await resp.json();
    aiEnabled = state.enabled;
    toggle.textContent = state.enabled ? 'AI: On' : 'AI: Off';
    toggle.classList.toggle('bg-green-600', state.enabled);
    toggle.classList.toggle('bg-gray-600', !state.enabled);
  });
})();
"#;
