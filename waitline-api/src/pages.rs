use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
};
use tower_sessions::Session;
use waitline_service::models::PartyStatus;

use crate::handlers::{connect_db, AppState};
use crate::session::PartySession;

pub async fn root() -> impl IntoResponse {
    found("/party/new")
}

pub async fn new_party() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
  <head><title>Join the waitlist</title></head>
  <body>
    <h1>Join the waitlist</h1>
    <form id="join">
      <label>Name <input name="name" maxlength="30" required></label>
      <label>Party size <input name="size" type="number" min="1" required></label>
      <button type="submit">Join</button>
    </form>
    <script>
      document.getElementById("join").addEventListener("submit", async (e) => {
        e.preventDefault();
        const data = new FormData(e.target);
        const res = await fetch("/party", {
          method: "POST",
          headers: { "content-type": "application/json" },
          body: JSON.stringify({ name: data.get("name"), size: Number(data.get("size")) }),
        });
        if (res.ok) window.location = "/party";
      });
    </script>
  </body>
</html>
"#,
    )
}

/// Status page for the party in the current session; clients without a
/// session are sent back to the join form.
pub async fn party_status(State(state): State<AppState>, session: Session) -> Response {
    let party_session = PartySession::new(session);
    let party_id = match party_session.party_id().await {
        Ok(Some(party_id)) => party_id,
        _ => return found("/party/new").into_response(),
    };

    let mut conn = match connect_db().await {
        Ok(conn) => conn,
        Err(err) => return err.into_response(),
    };
    let party = match state.store.get_by_party_id(&mut conn, &party_id).await {
        Ok(party) => party,
        Err(_) => {
            party_session.clear().await;
            return found("/party/new").into_response();
        }
    };

    let body = format!(
        r#"<!doctype html>
<html>
  <head><title>Your place in line</title></head>
  <body>
    <h1>Party {name}</h1>
    <p>Size: {size}</p>
    <p>Status: {status}</p>
  </body>
</html>
"#,
        name = escape_html(&party.name),
        size = party.size,
        status = status_label(party.status),
    );
    Html(body).into_response()
}

fn found(location: &'static str) -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, location)])
}

fn status_label(status: PartyStatus) -> &'static str {
    match status {
        PartyStatus::Queued => "waiting in line",
        PartyStatus::CheckingIn => "ready to check in",
        PartyStatus::Seated => "seated",
    }
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_metacharacters_are_escaped() {
        assert_eq!(
            escape_html(r#"<script>alert("&'")</script>"#),
            "&lt;script&gt;alert(&quot;&amp;&#39;&quot;)&lt;/script&gt;"
        );
    }

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(escape_html("Ada Lovelace"), "Ada Lovelace");
    }
}
