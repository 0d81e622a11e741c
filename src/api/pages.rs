//! Server-rendered HTML pages
//!
//! Plain inline templates; the interactive parts call the JSON API with
//! `fetch`. Every user-supplied value goes through `escape_html`.

use axum::{
    extract::{Path, State},
    response::Html,
    Extension,
};

use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::server::AppState;
use crate::services::payments::{ATTEMPTS_PER_PURCHASE, PRICE_CENTS};
use crate::services::{AssessmentType, Skill};
use crate::utils::escape_html;

fn layout(title: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title} | IELTS GenAI Prep</title>
<style>
body {{ font-family: system-ui, sans-serif; max-width: 52rem; margin: 2rem auto; padding: 0 1rem; color: #1d2733; }}
.card {{ border: 1px solid #d5dbe3; border-radius: 8px; padding: 1rem 1.25rem; margin: 1rem 0; }}
textarea {{ width: 100%; min-height: 16rem; }}
.muted {{ color: #5b6877; }}
</style>
</head>
<body>
<header><a href="/">IELTS GenAI Prep</a></header>
<main>
{body}
</main>
</body>
</html>"#,
        title = escape_html(title),
        body = body
    ))
}

fn price_label() -> String {
    format!("${}.{:02}", PRICE_CENTS / 100, PRICE_CENTS % 100)
}

pub async fn landing() -> Html<String> {
    let products: String = AssessmentType::ALL
        .iter()
        .map(|t| {
            format!(
                r#"<div class="card"><h3>{}</h3><p>{} attempts for {}</p></div>"#,
                t.title(),
                ATTEMPTS_PER_PURCHASE,
                price_label()
            )
        })
        .collect();

    layout(
        "Home",
        &format!(
            r#"<h1>Practise IELTS with AI examiners</h1>
<p>Get band scores for your Task 2 essays from Nova Micro and practise the
speaking test with Maya, our conversational examiner.</p>
{products}
<p><a href="/login">Sign in</a> to get started.</p>"#
        ),
    )
}

pub async fn login_page() -> Html<String> {
    layout(
        "Sign in",
        r#"<h1>Sign in</h1>
<form id="login" class="card">
<label>Email <input type="email" name="email" required></label><br>
<label>Password <input type="password" name="password" required></label><br>
<button type="submit">Sign in</button>
<p id="error" class="muted"></p>
</form>
<script>
document.getElementById('login').addEventListener('submit', async (e) => {
  e.preventDefault();
  const form = new FormData(e.target);
  const res = await fetch('/api/login', {
    method: 'POST',
    headers: {'Content-Type': 'application/json'},
    body: JSON.stringify({email: form.get('email'), password: form.get('password')})
  });
  if (res.ok) { window.location = '/dashboard'; return; }
  const body = await res.json();
  document.getElementById('error').textContent = body.error.message;
});
</script>"#,
    )
}

pub async fn dashboard(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Html<String>, ApiError> {
    let profile = state.accounts.profile(&user.email).await?;
    let results = state.accounts.results(&user.email).await?;

    let packages: String = AssessmentType::ALL
        .iter()
        .map(|t| {
            let remaining = profile.attempts(*t);
            let action = if remaining > 0 {
                format!(r#"<a href="/assessment/{}">Start</a>"#, t)
            } else {
                format!(
                    r#"<button onclick="buy('{}')">Buy {} attempts ({})</button>"#,
                    t,
                    ATTEMPTS_PER_PURCHASE,
                    price_label()
                )
            };
            format!(
                r#"<div class="card"><h3>{}</h3><p>{} attempts remaining</p>{}</div>"#,
                t.title(),
                remaining,
                action
            )
        })
        .collect();

    let history = if results.is_empty() {
        r#"<p class="muted">No assessments yet.</p>"#.to_string()
    } else {
        let rows: String = results
            .iter()
            .rev()
            .map(|r| {
                let band = r
                    .overall_band
                    .map(|b| format!("{:.1}", b))
                    .unwrap_or_else(|| "pending".to_string());
                format!(
                    "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                    r.submitted_at.format("%Y-%m-%d %H:%M"),
                    r.assessment_type.title(),
                    band,
                    escape_html(&r.feedback)
                )
            })
            .collect();
        format!(
            "<table><tr><th>Date</th><th>Assessment</th><th>Band</th><th>Feedback</th></tr>{}</table>",
            rows
        )
    };

    Ok(layout(
        "Dashboard",
        &format!(
            r#"<h1>Welcome, {name}</h1>
{packages}
<h2>Your results</h2>
{history}
<form method="post" action="/api/logout"><button type="submit">Sign out</button></form>
<script>
async function buy(assessmentType) {{
  const res = await fetch('/api/purchase/checkout', {{
    method: 'POST',
    headers: {{'Content-Type': 'application/json'}},
    body: JSON.stringify({{assessment_type: assessmentType}})
  }});
  const body = await res.json();
  if (res.ok) {{ window.location = body.url; }} else {{ alert(body.error.message); }}
}}
</script>"#,
            name = escape_html(&profile.full_name),
        ),
    ))
}

pub async fn assessment_page(
    Extension(_user): Extension<CurrentUser>,
    Path(raw_type): Path<String>,
) -> Result<Html<String>, ApiError> {
    let assessment_type: AssessmentType = raw_type
        .parse()
        .map_err(|_| ApiError::NotFound(format!("Unknown assessment type: {}", raw_type)))?;

    let body = match assessment_type.skill() {
        Skill::Writing => format!(
            r#"<h1>{title}</h1>
<div class="card"><p>{prompt}</p></div>
<textarea id="essay" placeholder="Write at least 250 words"></textarea>
<button id="submit">Submit for scoring</button>
<pre id="result"></pre>
<script>
document.getElementById('submit').addEventListener('click', async () => {{
  const res = await fetch('/api/nova-micro/writing', {{
    method: 'POST',
    headers: {{'Content-Type': 'application/json'}},
    body: JSON.stringify({{assessment_type: '{slug}', essay: document.getElementById('essay').value}})
  }});
  document.getElementById('result').textContent = JSON.stringify(await res.json(), null, 2);
}});
</script>"#,
            title = assessment_type.title(),
            prompt = escape_html(assessment_type.sample_prompt()),
            slug = assessment_type,
        ),
        Skill::Speaking => format!(
            r#"<h1>{title}</h1>
<p class="muted">{prompt}</p>
<div id="log" class="card"></div>
<input id="message" size="60"> <button id="send">Send</button>
<button id="finish">Finish and score</button>
<script>
let conversationId = null;
const log = (who, text) => {{
  const p = document.createElement('p');
  p.textContent = who + ': ' + text;
  document.getElementById('log').appendChild(p);
}};
async function call(path, payload) {{
  const res = await fetch(path, {{
    method: 'POST',
    headers: {{'Content-Type': 'application/json'}},
    body: JSON.stringify(payload)
  }});
  return res.json();
}}
call('/api/maya/conversation', {{assessment_type: '{slug}'}}).then((turn) => {{
  conversationId = turn.conversation_id;
  log('Maya', turn.reply);
}});
document.getElementById('send').addEventListener('click', async () => {{
  const input = document.getElementById('message');
  log('You', input.value);
  const turn = await call('/api/maya/conversation', {{conversation_id: conversationId, message: input.value}});
  input.value = '';
  log('Maya', turn.reply || turn.error.message);
}});
document.getElementById('finish').addEventListener('click', async () => {{
  const result = await call('/api/maya/assessment', {{conversation_id: conversationId}});
  log('Result', JSON.stringify(result));
}});
</script>"#,
            title = assessment_type.title(),
            prompt = escape_html(assessment_type.sample_prompt()),
            slug = assessment_type,
        ),
    };

    Ok(layout(assessment_type.title(), &body))
}
