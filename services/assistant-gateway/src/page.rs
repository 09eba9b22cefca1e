//! Login popup callback page
//!
//! The callback runs in a popup opened by the frontend. The page reports the
//! outcome to the opener with `postMessage` and closes itself, or redirects
//! to the frontend when there is no opener.

use serde_json::json;

/// Outcome reported to the frontend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure { title: &'static str, message: String },
}

impl Outcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Outcome::Failure {
            title: "Authentication Failed",
            message: message.into(),
        }
    }

    pub fn missing_code() -> Self {
        Outcome::Failure {
            title: "Authentication Error",
            message: "Missing authorization code. Please try again.".into(),
        }
    }

    /// Map the provider's `error`/`error_description` redirect parameters.
    pub fn provider_error(error: &str, description: Option<&str>) -> Self {
        let description = description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or("Authentication was denied or cancelled");
        if error.to_lowercase().contains("access_denied")
            || description.to_lowercase().contains("cancelled")
        {
            Self::failure(
                "Authentication was cancelled. Please try again if you want to access Microsoft features.",
            )
        } else if error.to_lowercase().contains("invalid") {
            Self::failure("Invalid authentication request. Please contact your administrator.")
        } else {
            Self::failure(description)
        }
    }

    /// Map a failed code exchange to a message the user can act on.
    pub fn exchange_error(err: &graph_auth::Error) -> Self {
        use graph_auth::Error as A;
        match err {
            A::Timeout(_) => Self::failure("Authentication timed out. Please try again."),
            A::Http(_) => {
                Self::failure("Network error occurred. Please check your connection and try again.")
            }
            A::MissingTransaction => Self::failure(
                "Your authentication session has expired. Please login again.",
            ),
            A::StateMismatch | A::OAuthExchange { .. } | A::TokenExchange(_) => {
                Self::failure("Token exchange failed. Please try logging in again.")
            }
            A::Configuration(_) => {
                Self::failure("Invalid authentication request. Please contact your administrator.")
            }
            _ => Self::failure(
                "An unexpected error occurred during authentication. Please try again.",
            ),
        }
    }

    fn parts(&self) -> (&'static str, &'static str, Option<&str>) {
        match self {
            Outcome::Success => ("auth_success", "Authentication Successful", None),
            Outcome::Failure { title, message } => ("auth_error", *title, Some(message.as_str())),
        }
    }
}

/// JSON literal that is safe inside a `<script>` element.
fn script_literal(value: &serde_json::Value) -> String {
    value
        .to_string()
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render the callback page for `outcome`, targeting `frontend_origin`.
pub fn render(outcome: &Outcome, frontend_origin: &str) -> String {
    let (kind, title, message) = outcome.parts();

    let mut payload = json!({"type": kind, "title": title});
    if let Some(message) = message {
        payload["message"] = json!(message);
    }
    let fallback = match outcome {
        Outcome::Success => format!("{frontend_origin}?authenticated=true"),
        Outcome::Failure { .. } => frontend_origin.to_string(),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{title_html}</title></head>
<body>
<p>{text_html}</p>
<script>
(function () {{
  var payload = {payload};
  if (window.opener) {{
    window.opener.postMessage(payload, {origin});
    window.close();
  }} else {{
    window.location.href = {fallback};
  }}
}})();
</script>
</body>
</html>
"#,
        title_html = escape_html(title),
        text_html = escape_html(message.unwrap_or(title)),
        payload = script_literal(&payload),
        origin = script_literal(&json!(frontend_origin)),
        fallback = script_literal(&json!(fallback)),
    )
}
