// src/views.rs
use crate::models::{HistoryEntry, Portfolio, Quote};
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt::Write;

/// Formats an amount as US dollars, e.g. `$1,234.56`.
pub fn usd(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let plain = format!("{:.2}", rounded.abs());
    let (whole, cents) = plain.split_once('.').unwrap_or((plain.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    format!("{}${}.{}", if negative { "-" } else { "" }, grouped, cents)
}

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
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

/// Which navigation links a page shows.
#[derive(Clone, Copy)]
enum Nav {
    Member,
    Guest,
    /// Error pages are rendered without knowing the session.
    Neutral,
}

fn layout(title: &str, nav: Nav, main: &str) -> String {
    let nav = match nav {
        Nav::Member => {
            r#"<ul class="nav">
      <li><a href="/quote">Quote</a></li>
      <li><a href="/buy">Buy</a></li>
      <li><a href="/sell">Sell</a></li>
      <li><a href="/history">History</a></li>
      <li><a href="/logout">Log Out</a></li>
    </ul>"#
        }
        Nav::Guest => {
            r#"<ul class="nav">
      <li><a href="/register">Register</a></li>
      <li><a href="/login">Log In</a></li>
    </ul>"#
        }
        Nav::Neutral => "",
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="initial-scale=1, width=device-width">
    <title>Finance: {title}</title>
  </head>
  <body>
    <nav><a href="/">Finance</a>
    {nav}
    </nav>
    <main>
{main}
    </main>
  </body>
</html>
"#,
        title = escape(title),
        nav = nav,
        main = main
    )
}

pub fn apology(message: &str, code: u16) -> String {
    let main = format!(
        r#"<div class="apology"><h1>{}</h1><p>{}</p></div>"#,
        code,
        escape(message)
    );
    layout("Apology", Nav::Neutral, &main)
}

pub fn login() -> String {
    layout(
        "Log In",
        Nav::Guest,
        r#"<form action="/login" method="post">
  <input autocomplete="off" autofocus name="username" placeholder="Username" type="text">
  <input name="password" placeholder="Password" type="password">
  <button type="submit">Log In</button>
</form>"#,
    )
}

pub fn register() -> String {
    layout(
        "Register",
        Nav::Guest,
        r#"<form action="/register" method="post">
  <input autocomplete="off" autofocus name="username" placeholder="Username" type="text">
  <input name="password" placeholder="Password" type="password">
  <input name="confirmation" placeholder="Password (again)" type="password">
  <button type="submit">Register</button>
</form>"#,
    )
}

pub fn quote_form() -> String {
    layout(
        "Quote",
        Nav::Member,
        r#"<form action="/quote" method="post">
  <input autocomplete="off" autofocus name="symbol" placeholder="Symbol" type="text">
  <button type="submit">Quote</button>
</form>"#,
    )
}

pub fn quoted(quote: &Quote) -> String {
    let main = format!(
        "<p>A share of {} ({}) costs {}.</p>",
        escape(&quote.name),
        escape(&quote.symbol),
        usd(quote.price)
    );
    layout("Quoted", Nav::Member, &main)
}

pub fn buy_form() -> String {
    layout(
        "Buy",
        Nav::Member,
        r#"<form action="/buy" method="post">
  <input autocomplete="off" autofocus name="symbol" placeholder="Symbol" type="text">
  <input autocomplete="off" min="1" name="shares" placeholder="Shares" type="number">
  <button type="submit">Buy</button>
</form>"#,
    )
}

pub fn sell_form(symbols: &[String]) -> String {
    let mut options = String::new();
    for symbol in symbols {
        let symbol = escape(symbol);
        let _ = writeln!(options, r#"    <option value="{0}">{0}</option>"#, symbol);
    }
    let main = format!(
        r#"<form action="/sell" method="post">
  <select name="symbol">
    <option disabled selected value="">Symbol</option>
{}  </select>
  <input autocomplete="off" min="1" name="shares" placeholder="Shares" type="number">
  <button type="submit">Sell</button>
</form>"#,
        options
    );
    layout("Sell", Nav::Member, &main)
}

pub fn index(portfolio: &Portfolio) -> String {
    let mut rows = String::new();
    for position in &portfolio.positions {
        let _ = writeln!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&position.symbol),
            escape(&position.name),
            position.shares,
            usd(position.price),
            usd(position.value)
        );
    }
    let main = format!(
        r#"<table>
<thead><tr><th>Symbol</th><th>Name</th><th>Shares</th><th>Price</th><th>TOTAL</th></tr></thead>
<tbody>
{rows}</tbody>
<tfoot>
<tr><td colspan="4">CASH</td><td>{cash}</td></tr>
<tr><td colspan="4">TOTAL</td><td>{total}</td></tr>
</tfoot>
</table>"#,
        rows = rows,
        cash = usd(portfolio.cash),
        total = usd(portfolio.total)
    );
    layout("Portfolio", Nav::Member, &main)
}

pub fn history(entries: &[HistoryEntry]) -> String {
    let mut rows = String::new();
    for entry in entries {
        let _ = writeln!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            entry.transaction_type,
            escape(&entry.symbol),
            entry.shares,
            usd(entry.price),
            entry.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
    }
    let main = format!(
        r#"<table>
<thead><tr><th>Type</th><th>Symbol</th><th>Shares</th><th>Price</th><th>Transacted</th></tr></thead>
<tbody>
{}</tbody>
</table>"#,
        rows
    );
    layout("History", Nav::Member, &main)
}
