//! htmx fragments for every response body and frame payload.
//!
//! Payloads are opaque to the delivery core; this module is the only place
//! that knows about markup. All prompt and model text goes through
//! [`text_to_html`] before it lands in a fragment.

use std::time::Duration;

/// Escape text for an HTML body and turn newlines into `<br>`.
pub fn text_to_html(text: &str) -> String {
    html_escape::encode_text(text).replace('\n', "<br>")
}

/// Form-encode `pairs` into a query string.
pub(crate) fn query_string(pairs: &[(&str, &str)]) -> String {
    // Pairs of strings cannot fail to serialize.
    serde_urlencoded::to_string(pairs).unwrap_or_default()
}

/// htmx trigger for a re-check after `delay`, e.g. `load delay:1s`.
fn recheck_trigger(delay: Duration) -> String {
    let millis = delay.as_millis();
    if millis % 1000 == 0 {
        format!("load delay:{}s", millis / 1000)
    } else {
        format!("load delay:{}ms", millis)
    }
}

// ── Validation ────────────────────────────────────────────────────────

pub fn prompt_error() -> String {
    r#"<div class="text-red-600">Please enter a prompt</div>"#.to_string()
}

// ── Polling ───────────────────────────────────────────────────────────

pub const POLL_IDLE: &str = r#"<div id="poll-result"></div>"#;

const POLL_SKELETON: &str = r#"<div class="animate-pulse">
				<div class="bg-orange-200 h-4 rounded mb-2"></div>
				<div class="bg-orange-200 h-4 rounded mb-2 w-3/4"></div>
				<div class="bg-orange-200 h-4 rounded w-1/2"></div>
			</div>"#;

/// Immediate answer to a poll submission: a skeleton that re-checks itself.
pub fn poll_loading(status_url: &str, delay: Duration) -> String {
    format!(
        r#"<div id="poll-result" hx-get="{url}" hx-trigger="{trigger}" hx-swap="outerHTML">
		<div class="bg-orange-50 border border-orange-200 rounded-lg p-4">
			<h4 class="font-semibold text-orange-800 mb-2">Response (Polling):</h4>
			{skeleton}
			<p class="text-sm text-orange-600 mt-2">Initializing request...</p>
		</div>
	</div>"#,
        url = html_escape::encode_double_quoted_attribute(status_url),
        trigger = recheck_trigger(delay),
        skeleton = POLL_SKELETON,
    )
}

pub fn poll_processing(status_url: &str, delay: Duration, phase: &str, elapsed: Duration) -> String {
    format!(
        r#"<div id="poll-result" hx-get="{url}" hx-trigger="{trigger}" hx-swap="outerHTML">
		<div class="bg-orange-50 border border-orange-200 rounded-lg p-4">
			<h4 class="font-semibold text-orange-800 mb-2">Response (Polling):</h4>
			{skeleton}
			<p class="text-sm text-orange-600 mt-2">{phase}</p>
			<div class="text-xs text-gray-500 mt-1">Elapsed: {elapsed:.1}s</div>
		</div>
	</div>"#,
        url = html_escape::encode_double_quoted_attribute(status_url),
        trigger = recheck_trigger(delay),
        skeleton = POLL_SKELETON,
        phase = phase,
        elapsed = elapsed.as_secs_f64(),
    )
}

pub fn poll_completed(result: &str) -> String {
    format!(
        r#"<div id="poll-result" class="bg-green-50 border border-green-200 rounded-lg p-4">
		<h4 class="font-semibold text-green-800 mb-2">Response (Polling):</h4>
		<p class="text-gray-700">{}</p>
		<div class="text-sm text-green-600 mt-2">✓ Response complete</div>
	</div>"#,
        text_to_html(result)
    )
}

pub fn poll_error(error: &str) -> String {
    format!(
        r#"<div id="poll-result" class="bg-red-50 border border-red-200 rounded-lg p-4">
		<h4 class="font-semibold text-red-800 mb-2">Error:</h4>
		<p class="text-red-700">{}</p>
	</div>"#,
        text_to_html(error)
    )
}

// ── Relay ─────────────────────────────────────────────────────────────

/// Shell returned by the relay-start endpoint; it opens the event stream
/// and routes each named event into a swap target.
pub fn relay_shell(stream_path: &str, prompt: &str, session: &str) -> String {
    let url = format!(
        "{}?{}",
        stream_path,
        query_string(&[("prompt", prompt), ("session", session)])
    );
    format!(
        r##"<div hx-ext="sse" sse-connect="{}">
		<div sse-swap="connecting"></div>
		<div sse-swap="update"></div>
		<div sse-swap="complete" hx-swap="outerHTML" hx-target="#sse-container"></div>
		<div sse-swap="error"></div>
	</div>"##,
        html_escape::encode_double_quoted_attribute(&url)
    )
}

pub fn relay_connecting() -> String {
    r#"<div class="bg-blue-50 border border-blue-200 rounded-lg p-4"><h4 class="font-semibold text-blue-800 mb-2">Response (SSE Streaming):</h4><div class="text-sm text-blue-600 mb-2">Connecting to OpenAI...</div><div id="sse-response"></div></div>"#.to_string()
}

pub fn relay_update(accumulated: &str) -> String {
    format!(r#"<p class="text-gray-700">{}</p>"#, text_to_html(accumulated))
}

pub fn relay_complete(final_text: &str) -> String {
    format!(
        r#"<div id="sse-container" class="mt-4 min-h-[100px]"><div class="bg-blue-50 border border-blue-200 rounded-lg p-4"><h4 class="font-semibold text-blue-800 mb-2">Response (SSE Streaming):</h4><p class="text-gray-700">{}</p><div class="text-sm text-green-600 mt-2">✓ Response complete</div></div></div>"#,
        text_to_html(final_text)
    )
}

pub fn relay_error(message: &str) -> String {
    format!(
        r#"<div class="text-red-600">Error: {}</div>"#,
        text_to_html(message)
    )
}

pub fn sse_container() -> String {
    r#"<div id="sse-container" class="mt-4 min-h-[100px]"></div>"#.to_string()
}

// ── Demo emitters ─────────────────────────────────────────────────────

pub fn basic_connected() -> String {
    r#"<div class="p-4 bg-green-100 rounded">Connected to SSE stream</div>"#.to_string()
}

pub fn basic_update(count: u64, timestamp: &str) -> String {
    format!(
        r#"<div class="p-4 bg-blue-100 rounded">Update #{} at {}</div>"#,
        count, timestamp
    )
}

pub fn multi_connected() -> String {
    r#"<div class="p-2 bg-green-100 rounded">Connected to multi-event SSE stream</div>"#.to_string()
}

pub fn multi_message(count: u64, timestamp: &str) -> String {
    format!(
        r#"<div class="p-2 bg-blue-100 rounded">Message #{} at {}</div>"#,
        count, timestamp
    )
}

pub fn alert(background: &str, label: &str, count: u64) -> String {
    format!(
        r#"<div class="p-2 {} rounded font-semibold">🔔 {} Alert #{}</div>"#,
        background, label, count
    )
}

pub fn status_badge(icon: &str, label: &str) -> String {
    format!(
        r#"<span class="inline-flex items-center px-2 py-1 bg-gray-100 rounded">{} {}</span>"#,
        icon, label
    )
}

pub fn status_panel(label: &str, timestamp: &str) -> String {
    format!(
        r#"
		<div class="p-4 bg-green-100 rounded">
			<span class="font-bold">Status:</span> {}
			<span class="text-gray-600 ml-2">({})</span>
		</div>
	"#,
        label, timestamp
    )
}
