#![cfg(test)]

use axum::{
    extract::{ws::Message, FromRequestParts},
    http::{self, request},
};
use chrono::TimeZone;
use remark_api::{AuthToken, CommentId, Error as ApiError, PostId};
use std::{collections::BTreeMap, panic::AssertUnwindSafe};

use crate::{
    extractors::*,
    gateway,
    store::{Approval, Deletion, Thread},
    *,
};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

fn parts(req: http::request::Builder) -> Option<request::Parts> {
    req.body(()).ok().map(|r| r.into_parts().0)
}

fn check_token(tok: Option<AuthToken>) {
    if let Some(AuthToken(tok)) = tok {
        assert!(!tok.is_empty());
        assert_eq!(tok.trim(), tok);
    }
}

do_tokio_test!(fuzz_identity_from_header, String, |token: String| async move {
    let req = http::Request::builder()
        .method(http::Method::GET)
        .uri("/socket")
        .header(http::header::AUTHORIZATION, token);
    if let Some(mut req) = parts(req) {
        match Identity::from_request_parts(&mut req, &()).await {
            Ok(Identity(tok)) => check_token(tok),
            Err(e) => match e {},
        }
    }
});

do_tokio_test!(fuzz_identity_from_query, String, |token: String| async move {
    let req = http::Request::builder()
        .method(http::Method::GET)
        .uri(format!("/socket?token={token}"));
    if let Some(mut req) = parts(req) {
        match Identity::from_request_parts(&mut req, &()).await {
            Ok(Identity(tok)) => check_token(tok),
            Err(e) => match e {},
        }
    }
});

#[tokio::test]
async fn identity_sources() {
    let tok = |t: &str| Some(AuthToken::new(t));
    let cases = [
        ("/socket", None, None),
        ("/socket?token=", None, None),
        ("/socket?token=%20", None, None),
        ("/socket?token=SFMyNTY.g2gDYQFuBgBn", None, tok("SFMyNTY.g2gDYQFuBgBn")),
        ("/socket", Some("Bearer moderator-token"), tok("moderator-token")),
        ("/socket", Some("bearer  moderator-token "), tok("moderator-token")),
        ("/socket", Some("Bearer"), None),
        // other schemes are ignored rather than refused
        ("/socket", Some("Basic Zm9vOmJhcg=="), None),
        ("/socket?token=abc", Some("Basic Zm9vOmJhcg=="), tok("abc")),
        // the header wins over the query string
        ("/socket?token=abc", Some("Bearer def"), tok("def")),
    ];
    for (uri, header, expected) in cases {
        let mut req = http::Request::builder().uri(uri);
        if let Some(h) = header {
            req = req.header(http::header::AUTHORIZATION, h);
        }
        let mut req = parts(req).expect("building request");
        let res = Identity::from_request_parts(&mut req, &()).await;
        assert_eq!(
            res.map(|i| i.0.map(|t| t.0)),
            Ok(expected.map(|t| t.0)),
            "for {uri} with {header:?}"
        );
    }
}

#[test]
fn fuzz_decode_never_panics() {
    bolero::check!()
        .with_type::<String>()
        .cloned()
        .for_each(|text| match gateway::decode(Message::Text(text)) {
            Ok(_) => (),
            Err(Error::Api(ApiError::Protocol(_))) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        })
}

/// Random sequences of (operation, comment id) applied to one thread, checked
/// against a plain model of what the thread should contain
#[test]
fn fuzz_thread_invariants() {
    let now = chrono::Utc.with_ymd_and_hms(2022, 11, 3, 10, 0, 0).unwrap();
    bolero::check!()
        .with_type::<Vec<(u8, u8)>>()
        .cloned()
        .for_each(|ops| {
            let mut thread = Thread::new(PostId::new("42"));
            let mut model = BTreeMap::<u64, bool>::new();
            let mut last_id = 0;
            for (op, id) in ops {
                let id = CommentId(u64::from(id % 16));
                match op % 4 {
                    0 | 1 => {
                        let body = if op % 8 == 1 { " " } else { "body" };
                        match thread.create("author", body, now) {
                            Ok(c) => {
                                assert!(c.comment_id.0 > last_id, "ids must increase");
                                assert!(!c.approved);
                                last_id = c.comment_id.0;
                                model.insert(last_id, false);
                            }
                            Err(e) => {
                                assert_eq!(body, " ");
                                assert!(matches!(e, ApiError::InvalidInput(_)));
                            }
                        }
                    }
                    2 => match thread.approve(id) {
                        Ok(Approval::Applied(c)) => {
                            assert_eq!(model.insert(id.0, true), Some(false));
                            assert!(c.approved);
                        }
                        Ok(Approval::AlreadyApproved(c)) => {
                            assert_eq!(model.get(&id.0), Some(&true));
                            assert!(c.approved);
                        }
                        Err(_) => assert!(!model.contains_key(&id.0)),
                    },
                    _ => match thread.delete(id) {
                        Ok(Deletion::Removed) => assert!(model.remove(&id.0).is_some()),
                        Ok(Deletion::AlreadyDeleted) => {
                            assert!(!model.contains_key(&id.0));
                            assert!(1 <= id.0 && id.0 <= last_id);
                        }
                        Err(_) => assert!(id.0 == 0 || id.0 > last_id),
                    },
                }
                let listed = thread
                    .list()
                    .into_iter()
                    .map(|c| (c.comment_id.0, c.approved))
                    .collect::<BTreeMap<_, _>>();
                assert_eq!(listed, model);
            }
        })
}
