use chrono::Duration;
use rust_decimal_macros::dec;
use std::sync::Arc;
use stock_trader::api::{routes, AppState};
use stock_trader::auth::SessionKeys;
use stock_trader::db;
use stock_trader::quote::StaticQuotes;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;

async fn test_state() -> Arc<AppState> {
    let pool = db::init_in_memory().await.unwrap();
    Arc::new(AppState {
        pool,
        quotes: Arc::new(StaticQuotes::new().with("AAPL", "Apple Inc.", dec!(150.00))),
        sessions: SessionKeys::new("test_secret", Duration::hours(1)),
        starting_cash: dec!(1000.00),
        bcrypt_cost: 4,
    })
}

fn session_from(response: &warp::http::Response<Bytes>) -> String {
    let cookie = response
        .headers()
        .get("set-cookie")
        .expect("session cookie")
        .to_str()
        .unwrap();
    cookie.split(';').next().unwrap().to_string()
}

fn body(response: &warp::http::Response<Bytes>) -> String {
    String::from_utf8(response.body().to_vec()).unwrap()
}

async fn post(
    state: &Arc<AppState>,
    path: &str,
    cookie: Option<&str>,
    form: &str,
) -> warp::http::Response<Bytes> {
    let mut request = warp::test::request()
        .method("POST")
        .path(path)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(form.to_string());
    if let Some(cookie) = cookie {
        request = request.header("cookie", cookie);
    }
    request.reply(&routes(state.clone())).await
}

async fn get(state: &Arc<AppState>, path: &str, cookie: Option<&str>) -> warp::http::Response<Bytes> {
    let mut request = warp::test::request().method("GET").path(path);
    if let Some(cookie) = cookie {
        request = request.header("cookie", cookie);
    }
    request.reply(&routes(state.clone())).await
}

async fn register(state: &Arc<AppState>, username: &str) -> String {
    let form = format!("username={0}&password=pw&confirmation=pw", username);
    let response = post(state, "/register", None, &form).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    session_from(&response)
}

#[tokio::test]
async fn anonymous_requests_are_sent_to_login() {
    let state = test_state().await;
    for path in ["/", "/quote", "/buy", "/sell", "/history"] {
        let response = get(&state, path, None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "{}", path);
        assert_eq!(response.headers()["location"], "/login");
    }

    let response = post(&state, "/buy", None, "symbol=AAPL&shares=1").await;
    assert_eq!(response.headers()["location"], "/login");

    let response = get(&state, "/", Some("session=forged")).await;
    assert_eq!(response.headers()["location"], "/login");
}

#[tokio::test]
async fn register_then_login() {
    let state = test_state().await;
    register(&state, "alice").await;

    let response = post(&state, "/login", None, "username=alice&password=wrong").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body(&response).contains("invalid username and/or password"));

    let response = post(&state, "/login", None, "username=alice&password=pw").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let cookie = session_from(&response);

    let response = get(&state, "/", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body(&response).contains("$1,000.00"));
}

#[tokio::test]
async fn registration_validates_its_form() {
    let state = test_state().await;
    register(&state, "bob").await;

    let cases = [
        ("password=pw&confirmation=pw", "must provide username"),
        ("username=carol&confirmation=pw", "must provide password"),
        ("username=carol&password=pw", "must provide confirmation"),
        ("username=carol&password=pw&confirmation=px", "password and confirmation do not match"),
        ("username=bob&password=pw&confirmation=pw", "username is already taken"),
    ];
    for (form, message) in cases {
        let response = post(&state, "/register", None, form).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", form);
        assert!(body(&response).contains(message), "{}", form);
    }
}

#[tokio::test]
async fn buy_sell_and_history() {
    let state = test_state().await;
    let cookie = register(&state, "dave").await;

    let response = post(&state, "/buy", Some(&cookie), "symbol=aapl&shares=4").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()["location"], "/");

    let response = get(&state, "/", Some(&cookie)).await;
    let page = body(&response);
    assert!(page.contains("<td>AAPL</td>"));
    assert!(page.contains("$400.00"));

    let response = get(&state, "/sell", Some(&cookie)).await;
    assert!(body(&response).contains(r#"<option value="AAPL">AAPL</option>"#));

    let response = post(&state, "/sell", Some(&cookie), "symbol=AAPL&shares=5").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body(&response).contains("shares sold exceeds shares owned"));

    let response = post(&state, "/sell", Some(&cookie), "symbol=AAPL&shares=4").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let response = get(&state, "/", Some(&cookie)).await;
    let page = body(&response);
    assert!(!page.contains("<td>AAPL</td>"));
    assert!(page.contains("$1,000.00"));

    let response = get(&state, "/history", Some(&cookie)).await;
    let page = body(&response);
    assert!(page.contains("<td>BUY</td><td>AAPL</td><td>4</td><td>$150.00</td>"));
    assert!(page.contains("<td>SELL</td><td>AAPL</td><td>4</td><td>$150.00</td>"));
}

#[tokio::test]
async fn order_validation_failures_are_bad_requests() {
    let state = test_state().await;
    let cookie = register(&state, "erin").await;

    let cases = [
        ("shares=1", "Missing symbol"),
        ("symbol=AAPL", "Missing shares"),
        ("symbol=AAPL&shares=-2", "Shares must be a positive integer"),
        ("symbol=AAPL&shares=1.5", "Shares must be a positive integer"),
        ("symbol=NOPE&shares=1", "Invalid Stock Symbol"),
        ("symbol=AAPL&shares=7", "cannot afford the number of shares at the current price"),
    ];
    for (form, message) in cases {
        let response = post(&state, "/buy", Some(&cookie), form).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", form);
        assert!(body(&response).contains(message), "{}", form);
    }

    let history = db::list_history(&state.pool, 1).await.unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn quote_shows_name_and_price() {
    let state = test_state().await;
    let cookie = register(&state, "frank").await;

    let response = post(&state, "/quote", Some(&cookie), "symbol=aapl").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body(&response).contains("A share of Apple Inc. (AAPL) costs $150.00."));

    let response = post(&state, "/quote", Some(&cookie), "symbol=").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body(&response).contains("missing symbol"));

    let response = post(&state, "/quote", Some(&cookie), "symbol=NOPE").await;
    assert!(body(&response).contains("stock symbol doesn&#x27;t exist"));
}

#[tokio::test]
async fn logout_clears_session_and_responses_are_not_cached() {
    let state = test_state().await;
    register(&state, "grace").await;

    let response = get(&state, "/logout", None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(response.headers()["set-cookie"]
        .to_str()
        .unwrap()
        .contains("Max-Age=0"));
    assert_eq!(
        response.headers()["cache-control"],
        "no-cache, no-store, must-revalidate"
    );
    assert_eq!(response.headers()["pragma"], "no-cache");
    assert_eq!(response.headers()["expires"], "0");
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let state = test_state().await;
    let response = get(&state, "/nowhere", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn login_page_clears_an_existing_session() {
    let state = test_state().await;
    let cookie = register(&state, "heidi").await;

    let response = get(&state, "/login", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response.headers()["set-cookie"].to_str().unwrap();
    assert!(set_cookie.starts_with("session=;"));
    assert!(set_cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn error_pages_for_members_hide_guest_links() {
    let state = test_state().await;
    let cookie = register(&state, "ivan").await;

    let response = post(&state, "/sell", Some(&cookie), "symbol=AAPL&shares=1").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let page = body(&response);
    assert!(page.contains("haven&#x27;t bought anything from this company yet"));
    assert!(!page.contains(r#"href="/register""#));
    assert!(!page.contains(r#"href="/login""#));
}
