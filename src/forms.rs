use crate::error::{DashboardError, Result};
use crate::models::{LoginOutcome, RiskLevel, Tone};

const LOGIN_ALERT_OPEN: &str = r#"<div class="alert alert-danger">"#;

pub fn risk_interpretation(level: Option<RiskLevel>) -> &'static str {
    match level {
        Some(RiskLevel::Low) => {
            "Student is at low risk of dropping out. Continue with regular support."
        }
        Some(RiskLevel::Medium) => {
            "Student is at moderate risk of dropping out. Consider additional support measures."
        }
        Some(RiskLevel::High) => {
            "Student is at high risk of dropping out. Immediate intervention recommended."
        }
        None => "Unable to determine risk level.",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentimentBand {
    pub label: &'static str,
    pub tone: Tone,
    pub interpretation: &'static str,
}

pub fn sentiment_band(score_percent: f64) -> SentimentBand {
    if score_percent > 65.0 {
        SentimentBand {
            label: "Positive",
            tone: Tone::Success,
            interpretation: "The text expresses a positive sentiment. The student appears to be satisfied and engaged.",
        }
    } else if score_percent < 35.0 {
        SentimentBand {
            label: "Negative",
            tone: Tone::Danger,
            interpretation: "The text expresses a negative sentiment. The student may be experiencing difficulties or dissatisfaction.",
        }
    } else {
        SentimentBand {
            label: "Neutral",
            tone: Tone::Info,
            interpretation: "The text expresses a neutral sentiment. The student appears to be neither particularly satisfied nor dissatisfied.",
        }
    }
}

pub fn validate_login(username: &str, password: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(DashboardError::action("login", "Username is required"));
    }
    if password.is_empty() {
        return Err(DashboardError::action("login", "Password is required"));
    }
    Ok(())
}

/// Resolves the three shapes `/login` answers with: a followed redirect, a
/// JSON body, or an HTML page carrying an alert.
pub fn interpret_login_response(
    requested_url: &str,
    final_url: &str,
    status: u16,
    content_type: Option<&str>,
    body: &str,
) -> Result<LoginOutcome> {
    if final_url != requested_url {
        return Ok(LoginOutcome::Redirect(final_url.to_string()));
    }

    let is_json = content_type.is_some_and(|value| value.contains("application/json"));
    if is_json {
        #[derive(serde::Deserialize, Default)]
        struct LoginBody {
            #[serde(default)]
            redirect: Option<String>,
            #[serde(default)]
            error: Option<String>,
        }

        let parsed: LoginBody = serde_json::from_str(body).map_err(|_| DashboardError::Parse {
            raw: body.to_string(),
        })?;
        if !(200..300).contains(&status) {
            return Err(DashboardError::Fetch {
                status: Some(status),
                message: parsed
                    .error
                    .unwrap_or_else(|| "Invalid credentials".to_string()),
            });
        }
        return Ok(match parsed.redirect {
            Some(target) => LoginOutcome::Redirect(target),
            None => LoginOutcome::Accepted,
        });
    }

    let message = extract_alert(body)
        .unwrap_or_else(|| "Login failed. Please check your credentials.".to_string());
    Err(DashboardError::Fetch {
        status: Some(status),
        message,
    })
}

fn extract_alert(html: &str) -> Option<String> {
    let start = html.find(LOGIN_ALERT_OPEN)? + LOGIN_ALERT_OPEN.len();
    let rest = &html[start..];
    let end = rest.find("</div>")?;
    let text = rest[..end].trim();
    (!text.is_empty()).then(|| text.to_string())
}
