mod common;

use reqwest::StatusCode;
use serde_json::json;

use common::{app, config, serve, token};
use lockstep::{
    gate::{Proof, Puzzle},
    model::{Identity, QueueSnapshot},
    queue::EnqueueTicket,
};

#[tokio::test]
async fn submissions_need_a_token() {
    let (state, _) = app(config());
    let base = serve(state).await;
    let http = reqwest::Client::new();

    let res = http.post(format!("{base}/api/enqueue")).json(&json!({"media": "yt:aaaaaaaaaaa"})).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = http
        .post(format!("{base}/api/enqueue"))
        .bearer_auth("garbage")
        .json(&json!({"media": "yt:aaaaaaaaaaa"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = http.get(format!("{base}/api/queue")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let snap: QueueSnapshot = res.json().await.unwrap();
    assert!(snap.is_empty());
}

#[tokio::test]
async fn puzzle_then_enqueue() {
    let (state, _) = app(config());
    let base = serve(state).await;
    let http = reqwest::Client::new();
    let alice = token("alice");

    let puzzle: Puzzle = http
        .post(format!("{base}/api/pow/puzzle"))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let proof = Proof::Work(puzzle.solve(&Identity::new("alice"), 1 << 20).unwrap());

    let res = http
        .post(format!("{base}/api/enqueue"))
        .bearer_auth(&alice)
        .json(&json!({"media": "aaaaaaaaaaa", "proof": proof}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let ticket: EnqueueTicket = res.json().await.unwrap();
    assert_eq!(ticket.media.as_str(), "yt:aaaaaaaaaaa");
    assert_eq!(ticket.rejection(), None);

    let res = http.get(format!("{base}/api/tickets/{}", ticket.id)).bearer_auth(&alice).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = http.get(format!("{base}/api/tickets/{}", uuid::Uuid::new_v4())).bearer_auth(&alice).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = http
        .post(format!("{base}/api/enqueue"))
        .bearer_auth(&alice)
        .json(&json!({"media": "no good"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wrong_challenge_answer_is_rejected() {
    let (state, _) = app(config());
    let base = serve(state).await;
    let http = reqwest::Client::new();
    let alice = token("alice");

    let res = http
        .post(format!("{base}/api/challenges/answer"))
        .bearer_auth(&alice)
        .json(&json!({"challenge_id": "nope", "answer": "nope"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn moderation_routes_check_the_caller() {
    let (state, _) = app(config());
    let base = serve(state).await;
    let http = reqwest::Client::new();
    let ban = json!({"identity": "alice", "scope": "chat", "reason": "spam"});

    let res = http.post(format!("{base}/api/mod/bans")).bearer_auth(token("alice")).json(&ban).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = http.post(format!("{base}/api/mod/bans")).bearer_auth(token("mod")).json(&ban).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = http
        .post(format!("{base}/api/chat"))
        .bearer_auth(token("alice"))
        .json(&json!({"text": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = http.delete(format!("{base}/api/mod/bans/alice")).bearer_auth(token("mod")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
