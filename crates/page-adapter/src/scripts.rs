//! Page-side JavaScript snippets evaluated over `Runtime.evaluate`.
//!
//! Media elements are tracked through `window.__adrush`, a registry of
//! monotonically increasing keys. Finder scripts reuse an existing key when
//! the same element is already registered and prune entries whose elements
//! have left the document; the status script never prunes, so a detached
//! element still answers `attached: false` instead of vanishing mid-retry.

use adrush_core_types::{Notification, NotificationKind};

/// Name of the CDP binding the observer script reports through.
pub const SIGNAL_BINDING: &str = "__adrushSignal";

/// DOM id of the toast element; a new toast removes the prior one.
pub const TOAST_ID: &str = "adrush-toast";

fn js_string(value: &str) -> String {
    // serde_json string encoding is valid JS string literal syntax.
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Install the player/title mutation observers. Idempotent per document:
/// each observer attaches once, guarded by window flags that a real
/// navigation naturally clears.
pub fn install_observers(player_selector: &str) -> String {
    let selector = js_string(player_selector);
    format!(
        r#"(() => {{
    const w = window;
    w.__adrush = w.__adrush || {{ seq: 0, refs: {{}} }};
    if (typeof w.{binding} !== 'function') {{ return 'no-binding'; }}
    const player = document.querySelector({selector});
    if (player && !w.__adrushPlayerObserved) {{
        const mo = new MutationObserver((mutations) => {{
            for (const m of mutations) {{
                if ((m.type === 'attributes' && m.attributeName === 'class') || m.type === 'childList') {{
                    w.{binding}('player');
                    return;
                }}
            }}
        }});
        mo.observe(player, {{
            childList: true,
            subtree: true,
            attributes: true,
            attributeFilter: ['class'],
        }});
        w.__adrushPlayerObserved = true;
    }}
    const title = document.querySelector('title');
    if (title && !w.__adrushTitleObserved) {{
        const nav = new MutationObserver(() => w.{binding}('title'));
        nav.observe(title, {{ childList: true, characterData: true }});
        w.__adrushTitleObserved = true;
    }}
    if (!player) {{ return 'no-player'; }}
    return title ? 'ok' : 'no-title';
}})()"#,
        binding = SIGNAL_BINDING,
        selector = selector,
    )
}

/// Current class string of the player container, or null when absent.
pub fn player_classes(player_selector: &str) -> String {
    let selector = js_string(player_selector);
    format!(
        "(() => {{ const p = document.querySelector({selector}); return p ? ('' + p.className) : null; }})()"
    )
}

const REGISTER_HELPERS: &str = r#"
    const reg = (window.__adrush = window.__adrush || { seq: 0, refs: {} });
    const register = (v) => {
        for (const k in reg.refs) {
            if (!document.contains(reg.refs[k])) { delete reg.refs[k]; continue; }
            if (reg.refs[k] === v) { return k; }
        }
        const key = 'v' + (++reg.seq);
        reg.refs[key] = v;
        return key;
    };
"#;

/// Media element inside the player container with metadata loaded.
pub fn video_in_player(player_selector: &str) -> String {
    let selector = js_string(player_selector);
    format!(
        r#"(() => {{{helpers}
    const p = document.querySelector({selector});
    const v = p ? p.querySelector('video') : null;
    if (v && v.readyState >= 1) {{ return register(v); }}
    return null;
}})()"#,
        helpers = REGISTER_HELPERS,
        selector = selector,
    )
}

/// Whole-document fallback scan for an active media element.
pub fn scan_videos() -> String {
    format!(
        r#"(() => {{{helpers}
    const all = document.querySelectorAll('video');
    for (const v of all) {{
        if ((v.duration > 0 || !v.paused || v.currentTime > 0) && v.readyState >= 1) {{
            return register(v);
        }}
    }}
    return null;
}})()"#,
        helpers = REGISTER_HELPERS,
    )
}

/// Status snapshot for a registered element, or null when the key is gone.
pub fn media_status(key: &str) -> String {
    let key = js_string(key);
    format!(
        r#"(() => {{
    const reg = window.__adrush;
    if (!reg) {{ return null; }}
    const v = reg.refs[{key}];
    if (!v) {{ return null; }}
    return {{
        attached: document.contains(v),
        ready: v.readyState >= 1,
        rate: v.playbackRate,
        duration: isFinite(v.duration) ? v.duration : 0,
        paused: v.paused,
        currentTime: v.currentTime,
    }};
}})()"#
    )
}

/// Write the playback rate. Returns false without touching the element when
/// it is gone or detached.
pub fn set_playback_rate(key: &str, rate: f64) -> String {
    let key = js_string(key);
    format!(
        r#"(() => {{
    const reg = window.__adrush;
    if (!reg) {{ return false; }}
    const v = reg.refs[{key}];
    if (!v || !document.contains(v)) {{ return false; }}
    v.playbackRate = {rate};
    return true;
}})()"#
    )
}

pub fn current_url() -> &'static str {
    "location.href"
}

/// Transient toast overlay: fixed top-right, red for speedup, green for
/// restore, fade in/out, 2.5s dwell. Removes any prior toast first.
pub fn show_toast(note: &Notification) -> String {
    let message = js_string(&note.message);
    let background = match note.kind {
        NotificationKind::Speedup => "#DC3545",
        NotificationKind::Restore => "#28A745",
    };
    format!(
        r#"(() => {{
    if (!document.body) {{ return false; }}
    const existing = document.getElementById('{toast_id}');
    if (existing) {{ existing.remove(); }}
    const el = document.createElement('div');
    el.id = '{toast_id}';
    el.style.cssText = 'position: fixed; top: 80px; right: 20px; z-index: 2147483647;'
        + 'padding: 8px 12px; border-radius: 4px; font-size: 13px; font-weight: bold;'
        + 'color: white; pointer-events: none; opacity: 0;'
        + 'transition: opacity 0.3s ease-in-out; box-shadow: 0 2px 5px rgba(0,0,0,0.2);'
        + 'background: {background};';
    el.textContent = {message};
    document.body.appendChild(el);
    setTimeout(() => {{ el.style.opacity = '1'; }}, 50);
    setTimeout(() => {{
        if (el.parentNode) {{
            el.style.opacity = '0';
            setTimeout(() => el.remove(), 300);
        }}
    }}, 2500);
    return true;
}})()"#,
        toast_id = TOAST_ID,
        background = background,
        message = message,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_is_escaped_as_a_js_literal() {
        let script = player_classes("#movie_player");
        assert!(script.contains("\"#movie_player\""));

        let hostile = player_classes("a\"b");
        assert!(hostile.contains("\"a\\\"b\""));
    }

    #[test]
    fn observer_script_reports_through_the_binding() {
        let script = install_observers("#movie_player");
        assert!(script.contains(SIGNAL_BINDING));
        assert!(script.contains("attributeFilter: ['class']"));
        assert!(script.contains("'player'"));
        assert!(script.contains("'title'"));
    }

    #[test]
    fn set_rate_script_embeds_the_target() {
        let script = set_playback_rate("v3", 16.0);
        assert!(script.contains("\"v3\""));
        assert!(script.contains("v.playbackRate = 16;") || script.contains("v.playbackRate = 16"));
    }

    #[test]
    fn toast_colors_follow_the_kind() {
        let speedup = show_toast(&Notification::speedup(16.0));
        assert!(speedup.contains("#DC3545"));
        let restore = show_toast(&Notification::restore());
        assert!(restore.contains("#28A745"));
    }
}
