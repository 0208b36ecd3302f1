mod common;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::Duration;
use common::{acquire_db_lock, json_body, try_app, TestApp};
use guestlist::models::GuestList;
use guestlist::notifier::Notification;
use serde_json::{json, Value};

struct CreatedShare {
    id: String,
    token: String,
}

async fn create_share(app: &TestApp, organiser: &str, list: &GuestList) -> Result<CreatedShare> {
    let response = app
        .post_json(
            &format!("/api/guest-lists/{}/shares", list.id),
            &json!({
                "recipient_email": "Reviewer@Example.com",
                "recipient_name": "Rita Reviewer"
            }),
            Some(organiser),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = json_body(response).await?;
    Ok(CreatedShare {
        id: body["id"].as_str().unwrap_or_default().to_string(),
        token: body["token"].as_str().unwrap_or_default().to_string(),
    })
}

async fn send_otp(app: &TestApp, token: &str) -> Result<StatusCode> {
    let response = app
        .post_json(
            &format!("/public/guest-lists/{token}/send-otp"),
            &json!({}),
            None,
        )
        .await?;
    Ok(response.status())
}

async fn verify(app: &TestApp, token: &str, code: &str) -> Result<(StatusCode, Value)> {
    let response = app
        .post_json(
            &format!("/public/guest-lists/{token}/verify"),
            &json!({ "code": code }),
            None,
        )
        .await?;
    let status = response.status();
    let body: Value = json_body(response).await?;
    Ok((status, body))
}

/// A six-digit code guaranteed to differ from `code`.
fn wrong_code(code: &str) -> String {
    code.chars()
        .map(|c| if c == '1' { '2' } else { '1' })
        .collect()
}

#[tokio::test]
async fn reviewer_verifies_and_views_the_list() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = try_app().await? else {
        return Ok(());
    };

    let organiser = app.organiser_token().await?;
    let list = app.insert_guest_list("Autumn Gala", false).await?;
    let zed = app.insert_contact("Zed", "Zulu", "zed@example.com").await?;
    let amy = app.insert_contact("Amy", "Alpha", "amy@example.com").await?;
    app.insert_item(list.id, &zed).await?;
    app.insert_item(list.id, &amy).await?;

    let share = create_share(&app, &organiser, &list).await?;

    let queued = app.queued_notifications().await?;
    assert!(matches!(
        queued.as_slice(),
        [Notification::ShareNotification(message)]
            if message.recipient_email == "reviewer@example.com"
                && message.share_url.ends_with(&share.token)
    ));

    let response = app
        .get(&format!("/public/guest-lists/{}", share.token), None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let info: Value = json_body(response).await?;
    assert_eq!(info["guest_list"]["name"], "Autumn Gala");
    assert_eq!(info["verified"], false);
    assert_ne!(info["recipient_email_masked"], "reviewer@example.com");

    let response = app
        .get(&format!("/public/guest-lists/{}/view", share.token), None)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(send_otp(&app, &share.token).await?, StatusCode::ACCEPTED);
    let code = app.notifier.wait_for_otp("reviewer@example.com", 1).await?;
    assert_eq!(code.len(), 6);

    let (status, body) = verify(&app, &share.token, &format!(" {code} ")).await?;
    assert_eq!(status, StatusCode::OK);
    let session = body["session_token"].as_str().unwrap_or_default().to_string();
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 7200);

    let (status, _) = verify(&app, &share.token, &code).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "codes are single use");

    for expected in 1..=2 {
        let response = app
            .get(
                &format!("/public/guest-lists/{}/view", share.token),
                Some(&session),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let view: Value = json_body(response).await?;
        assert_eq!(view["access_count"], expected);
        let names: Vec<&str> = view["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item["contact_name"].as_str())
                    .collect()
            })
            .unwrap_or_default();
        assert_eq!(names, vec!["Amy Alpha", "Zed Zulu"]);
        assert!(view["items"][0].get("contact_email").is_none());
    }

    let stored = app
        .share(share.id.parse()?)
        .await?;
    assert!(stored.verified_at.is_some());
    assert_eq!(stored.access_count, 2);
    assert!(stored.last_accessed_at.is_some());

    let other = create_share(&app, &organiser, &list).await?;
    let response = app
        .get(
            &format!("/public/guest-lists/{}/view", other.token),
            Some(&session),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let actions = app.audit_actions().await?;
    for expected in ["share.created", "share.otp_sent", "share.otp_verified", "share.viewed"] {
        assert!(
            actions.iter().any(|action| action == expected),
            "missing audit action {expected}"
        );
    }

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn reviewer_can_only_touch_round_and_notes() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = try_app().await? else {
        return Ok(());
    };

    let organiser = app.organiser_token().await?;
    let list = app.insert_guest_list("Board Dinner", false).await?;
    let contact = app.insert_contact("Dana", "Doe", "dana@example.com").await?;
    let item = app.insert_item(list.id, &contact).await?;
    let share = create_share(&app, &organiser, &list).await?;

    assert_eq!(send_otp(&app, &share.token).await?, StatusCode::ACCEPTED);
    let code = app.notifier.wait_for_otp("reviewer@example.com", 1).await?;
    let (_, body) = verify(&app, &share.token, &code).await?;
    let session = body["session_token"].as_str().unwrap_or_default().to_string();
    let path = format!("/public/guest-lists/{}/items/{}", share.token, item.id);

    let response = app
        .patch_json(
            &path,
            &json!({ "invite_round": "Second", "reviewer_notes": "  seat near the stage " }),
            Some(&session),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Value = json_body(response).await?;
    assert_eq!(updated["invite_round"], "second");
    assert_eq!(updated["reviewer_notes"], "seat near the stage");

    let response = app
        .patch_json(&path, &json!({ "rsvp_status": "accepted" }), Some(&session))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .patch_json(&path, &json!({ "invite_round": "vip" }), Some(&session))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .patch_json(&path, &json!({ "reviewer_notes": null }), Some(&session))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let stored = app.item(item.id).await?;
    assert_eq!(stored.invite_round.as_deref(), Some("second"));
    assert_eq!(stored.reviewer_notes, None);
    assert_eq!(stored.rsvp_status, None);

    let response = app
        .patch_json(&path, &json!({ "invite_round": "first" }), None)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn sixth_guess_locks_the_code() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = try_app().await? else {
        return Ok(());
    };

    let organiser = app.organiser_token().await?;
    let list = app.insert_guest_list("Press Launch", false).await?;
    let share = create_share(&app, &organiser, &list).await?;

    assert_eq!(send_otp(&app, &share.token).await?, StatusCode::ACCEPTED);
    let code = app.notifier.wait_for_otp("reviewer@example.com", 1).await?;
    let wrong = wrong_code(&code);

    for remaining in (0..5).rev() {
        let (status, body) = verify(&app, &share.token, &wrong).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["attempts_remaining"], remaining);
    }

    let (status, _) = verify(&app, &share.token, &code).await?;
    assert_eq!(status, StatusCode::LOCKED);

    let actions = app.audit_actions().await?;
    assert_eq!(
        actions.iter().filter(|a| *a == "share.otp_failed").count(),
        5
    );
    assert!(actions.iter().any(|a| a == "share.otp_locked"));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn codes_expire_and_sends_are_rate_limited() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = try_app().await? else {
        return Ok(());
    };

    let organiser = app.organiser_token().await?;
    let list = app.insert_guest_list("Winter Party", false).await?;
    let share = create_share(&app, &organiser, &list).await?;

    for sent in 1..=3 {
        assert_eq!(send_otp(&app, &share.token).await?, StatusCode::ACCEPTED);
        app.notifier.wait_for_otp("reviewer@example.com", sent).await?;
        app.clock.advance(Duration::seconds(30));
    }
    assert_eq!(
        send_otp(&app, &share.token).await?,
        StatusCode::TOO_MANY_REQUESTS
    );

    let code = app.notifier.wait_for_otp("reviewer@example.com", 3).await?;
    app.clock.advance(Duration::minutes(11));

    let (status, body) = verify(&app, &share.token, &code).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "verification code has expired");

    assert_eq!(send_otp(&app, &share.token).await?, StatusCode::ACCEPTED);
    let fresh = app.notifier.wait_for_otp("reviewer@example.com", 4).await?;
    let (status, _) = verify(&app, &share.token, &fresh).await?;
    assert_eq!(status, StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn revoked_share_is_gone_everywhere() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = try_app().await? else {
        return Ok(());
    };

    let organiser = app.organiser_token().await?;
    let list = app.insert_guest_list("Founders Lunch", false).await?;
    let share = create_share(&app, &organiser, &list).await?;

    assert_eq!(send_otp(&app, &share.token).await?, StatusCode::ACCEPTED);
    let code = app.notifier.wait_for_otp("reviewer@example.com", 1).await?;
    let (_, body) = verify(&app, &share.token, &code).await?;
    let session = body["session_token"].as_str().unwrap_or_default().to_string();
    let (status, _) = verify(&app, &share.token, "").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            &format!("/api/shares/{}/revoke", share.id),
            &json!({}),
            Some(&organiser),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let base = format!("/public/guest-lists/{}", share.token);
    assert_eq!(app.get(&base, None).await?.status(), StatusCode::GONE);
    assert_eq!(send_otp(&app, &share.token).await?, StatusCode::GONE);
    let (status, _) = verify(&app, &share.token, "123456").await?;
    assert_eq!(status, StatusCode::GONE);
    let (status, _) = verify(&app, &share.token, "  ").await?;
    assert_eq!(status, StatusCode::GONE, "share state is checked before the code");
    let response = app
        .post_json(&format!("{base}/verify"), &json!({}), None)
        .await?;
    assert_eq!(response.status(), StatusCode::GONE);
    let response = app.get(&format!("{base}/view"), Some(&session)).await?;
    assert_eq!(response.status(), StatusCode::GONE);

    app.clock.advance(Duration::days(31));
    let live = create_share(&app, &organiser, &list).await?;
    let response = app
        .get(&format!("/public/guest-lists/{}", live.token), None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let unknown = "ab".repeat(32);
    let response = app
        .get(&format!("/public/guest-lists/{unknown}"), None)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}
