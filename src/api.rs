// src/api.rs
use crate::auth::{self, clear_session_cookie, SessionKeys, SESSION_COOKIE};
use crate::db;
use crate::error::AppError;
use crate::models::{normalize_symbol, TransactionType};
use crate::quote::QuoteProvider;
use crate::trade;
use crate::views;
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::convert::Infallible;
use std::sync::Arc;
use warp::filters::body::BodyDeserializeError;
use warp::http::header::{HeaderMap, HeaderValue, CACHE_CONTROL, EXPIRES, PRAGMA, SET_COOKIE};
use warp::http::{StatusCode, Uri};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

const FORM_LIMIT: u64 = 16 * 1024;

pub struct AppState {
    pub pool: SqlitePool,
    pub quotes: Arc<dyn QuoteProvider>,
    pub sessions: SessionKeys,
    pub starting_cash: Decimal,
    pub bcrypt_cost: u32,
}

#[derive(Deserialize)]
struct CredentialsForm {
    username: Option<String>,
    password: Option<String>,
    confirmation: Option<String>,
}

#[derive(Deserialize)]
struct QuoteForm {
    symbol: Option<String>,
}

#[derive(Deserialize)]
struct OrderForm {
    symbol: Option<String>,
    shares: Option<String>,
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let index = warp::path::end()
        .and(warp::get())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and_then(index_handler);

    let register_form = warp::path!("register")
        .and(warp::get())
        .map(|| warp::reply::html(views::register()));

    let register = warp::path!("register")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(form::<CredentialsForm>())
        .and_then(register_handler);

    let login_form = warp::path!("login")
        .and(warp::get())
        .map(|| with_cookie(warp::reply::html(views::login()), clear_session_cookie()));

    let login = warp::path!("login")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(form::<CredentialsForm>())
        .and_then(login_handler);

    let logout = warp::path!("logout")
        .and(warp::get())
        .map(|| with_cookie(redirect_to("/"), clear_session_cookie()));

    let quote_form = warp::path!("quote")
        .and(warp::get())
        .and(with_user(state.clone()))
        .map(|_user_id: i64| warp::reply::html(views::quote_form()));

    let quote = warp::path!("quote")
        .and(warp::post())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and(form::<QuoteForm>())
        .and_then(quote_handler);

    let buy_form = warp::path!("buy")
        .and(warp::get())
        .and(with_user(state.clone()))
        .map(|_user_id: i64| warp::reply::html(views::buy_form()));

    let buy = warp::path!("buy")
        .and(warp::post())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and(form::<OrderForm>())
        .and_then(buy_handler);

    let sell_form = warp::path!("sell")
        .and(warp::get())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and_then(sell_form_handler);

    let sell = warp::path!("sell")
        .and(warp::post())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and(form::<OrderForm>())
        .and_then(sell_handler);

    let history = warp::path!("history")
        .and(warp::get())
        .and(with_user(state.clone()))
        .and(with_state(state))
        .and_then(history_handler);

    let auth_routes = register_form
        .or(register)
        .or(login_form)
        .or(login)
        .or(logout)
        .boxed();
    let trade_routes = index
        .or(quote_form)
        .or(quote)
        .or(buy_form)
        .or(buy)
        .or(sell_form)
        .or(sell)
        .or(history)
        .boxed();

    auth_routes
        .or(trade_routes)
        .recover(handle_rejection)
        .with(no_cache())
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Resolves the logged-in user id from the session cookie.
fn with_user(state: Arc<AppState>) -> impl Filter<Extract = (i64,), Error = Rejection> + Clone {
    warp::cookie::optional::<String>(SESSION_COOKIE).and_then(move |token: Option<String>| {
        let state = state.clone();
        async move {
            let token = token.ok_or_else(|| warp::reject::custom(AppError::Unauthorized))?;
            state.sessions.verify_token(&token).map_err(|e| {
                debug!("Rejected session token: {}", e);
                warp::reject::custom(AppError::Unauthorized)
            })
        }
    })
}

fn form<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: DeserializeOwned + Send,
{
    warp::body::content_length_limit(FORM_LIMIT).and(warp::body::form())
}

fn no_cache() -> warp::filters::reply::WithHeaders {
    let mut headers = HeaderMap::new();
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    warp::reply::with::headers(headers)
}

fn redirect_to(path: &'static str) -> impl Reply {
    warp::redirect::see_other(Uri::from_static(path))
}

fn with_cookie(reply: impl Reply, cookie: String) -> impl Reply {
    warp::reply::with_header(reply, SET_COOKIE, cookie)
}

fn reject(err: AppError) -> Rejection {
    warp::reject::custom(err)
}

/// Treats a blank form field the same as a missing one.
fn field(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

async fn index_handler(user_id: i64, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let portfolio = trade::portfolio(&state.pool, state.quotes.as_ref(), user_id)
        .await
        .map_err(reject)?;
    Ok(warp::reply::html(views::index(&portfolio)))
}

async fn register_handler(
    state: Arc<AppState>,
    form: CredentialsForm,
) -> Result<impl Reply, Rejection> {
    let username = field(&form.username)
        .ok_or_else(|| reject(AppError::apology("must provide username")))?
        .trim()
        .to_string();
    let password = field(&form.password)
        .ok_or_else(|| reject(AppError::apology("must provide password")))?
        .to_string();
    let confirmation =
        field(&form.confirmation).ok_or_else(|| reject(AppError::apology("must provide confirmation")))?;
    if password != confirmation {
        return Err(reject(AppError::apology(
            "password and confirmation do not match",
        )));
    }

    let cost = state.bcrypt_cost;
    let hash = tokio::task::spawn_blocking(move || auth::hash_password(&password, cost))
        .await
        .map_err(|e| reject(AppError::Internal(e.to_string())))?
        .map_err(reject)?;

    match db::create_user(&state.pool, &username, &hash, state.starting_cash).await {
        Ok(user_id) => {
            info!("Registered user {} ({}).", username, user_id);
            let token = state.sessions.create_token(user_id).map_err(reject)?;
            Ok(with_cookie(
                redirect_to("/"),
                state.sessions.session_cookie(&token),
            ))
        }
        Err(e) => {
            warn!("Failed to register {}: {}", username, e);
            Err(reject(e))
        }
    }
}

async fn login_handler(
    state: Arc<AppState>,
    form: CredentialsForm,
) -> Result<impl Reply, Rejection> {
    let username = field(&form.username)
        .ok_or_else(|| reject(AppError::apology("must provide username")))?
        .trim()
        .to_string();
    let password = field(&form.password)
        .ok_or_else(|| reject(AppError::apology("must provide password")))?
        .to_string();

    let invalid = || reject(AppError::apology("invalid username and/or password"));
    let user = db::find_user_by_username(&state.pool, &username)
        .await
        .map_err(reject)?
        .ok_or_else(invalid)?;

    let hash = user.hash.clone();
    let verified = tokio::task::spawn_blocking(move || auth::verify_password(&password, &hash))
        .await
        .map_err(|e| reject(AppError::Internal(e.to_string())))?
        .map_err(reject)?;
    if !verified {
        info!("Failed login for {}.", username);
        return Err(invalid());
    }

    info!("User {} logged in.", user.id);
    let token = state.sessions.create_token(user.id).map_err(reject)?;
    Ok(with_cookie(
        redirect_to("/"),
        state.sessions.session_cookie(&token),
    ))
}

async fn quote_handler(
    _user_id: i64,
    state: Arc<AppState>,
    form: QuoteForm,
) -> Result<impl Reply, Rejection> {
    let symbol = field(&form.symbol)
        .map(normalize_symbol)
        .ok_or_else(|| reject(AppError::apology("missing symbol")))?;

    match state.quotes.lookup(&symbol).await {
        Ok(Some(quote)) => Ok(warp::reply::html(views::quoted(&quote))),
        Ok(None) => Err(reject(AppError::apology("stock symbol doesn't exist"))),
        Err(e) => {
            error!("Failed to look up {}: {}", symbol, e);
            Err(reject(e))
        }
    }
}

async fn buy_handler(
    user_id: i64,
    state: Arc<AppState>,
    form: OrderForm,
) -> Result<impl Reply, Rejection> {
    place(user_id, &state, TransactionType::Buy, form).await
}

async fn sell_handler(
    user_id: i64,
    state: Arc<AppState>,
    form: OrderForm,
) -> Result<impl Reply, Rejection> {
    place(user_id, &state, TransactionType::Sell, form).await
}

async fn place(
    user_id: i64,
    state: &AppState,
    side: TransactionType,
    form: OrderForm,
) -> Result<impl Reply, Rejection> {
    let receipt = trade::place_order(
        &state.pool,
        state.quotes.as_ref(),
        user_id,
        side,
        form.symbol.as_deref(),
        form.shares.as_deref(),
    )
    .await
    .map_err(reject)?;
    debug!(
        "{} {} x{} settled, user {} cash now {}",
        side, receipt.symbol, receipt.shares, user_id, receipt.cash
    );
    Ok(redirect_to("/"))
}

async fn sell_form_handler(user_id: i64, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let symbols = db::held_symbols(&state.pool, user_id)
        .await
        .map_err(reject)?;
    Ok(warp::reply::html(views::sell_form(&symbols)))
}

async fn history_handler(user_id: i64, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let entries = db::list_history(&state.pool, user_id)
        .await
        .map_err(reject)?;
    Ok(warp::reply::html(views::history(&entries)))
}

fn apology_response(message: &str, status: StatusCode) -> Response {
    warp::reply::with_status(
        warp::reply::html(views::apology(message, status.as_u16())),
        status,
    )
    .into_response()
}

pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if let Some(app_err) = err.find::<AppError>() {
        match app_err {
            AppError::Unauthorized => return Ok(redirect_to("/login").into_response()),
            AppError::Apology(message) => debug!("Apology: {}", message),
            AppError::Conflict => warn!("Concurrent balance update rejected"),
            other => error!("Request failed: {}", other),
        }
        return Ok(apology_response(&app_err.public_message(), app_err.status()));
    }

    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(apology_response(
            "method not allowed",
            StatusCode::METHOD_NOT_ALLOWED,
        ));
    }
    if err.is_not_found() {
        return Ok(apology_response("page not found", StatusCode::NOT_FOUND));
    }
    if let Some(e) = err.find::<BodyDeserializeError>() {
        debug!("Malformed form: {}", e);
        return Ok(apology_response("malformed form", StatusCode::BAD_REQUEST));
    }

    warn!("Unhandled rejection: {:?}", err);
    Ok(apology_response("bad request", StatusCode::BAD_REQUEST))
}
