use crate::logic::{AggregateState, ChainResult, WindowSummary};
use std::fmt::Write;

const STYLE: &str = r#"
        body { font-family: -apple-system, "Segoe UI", Roboto, sans-serif; background: #f8f9fa; color: #212529; margin: 0; }
        .container { max-width: 1100px; margin: 0 auto; padding: 24px; }
        .summary { display: flex; gap: 16px; margin-bottom: 24px; }
        .stat { flex: 1; background: #fff; border-left: 4px solid #fbdd11; padding: 16px; text-align: center; }
        .stat-label { font-size: 0.9rem; color: #6c757d; }
        .stat-value { font-size: 1.5rem; font-weight: bold; color: #e6c900; }
        .card { background: #fff; border: 1px solid #dee2e6; margin-bottom: 24px; }
        .card-header { background: #fbdd11; font-weight: bold; padding: 12px 16px; }
        .card-body { padding: 16px; }
        table { width: 100%; border-collapse: collapse; }
        th, td { text-align: left; padding: 8px; border-bottom: 1px solid #dee2e6; }
        .bar { height: 8px; background: #fbdd11; border-radius: 4px; }
        .warning { color: #b35900; font-size: 0.85rem; }
        footer { text-align: center; color: #6c757d; padding: 24px; font-size: 0.85rem; }
"#;

/// Full HTML page for the stored document, or the "no data yet" page
pub fn render_report(state: Option<&AggregateState>) -> String {
    let mut body = String::new();
    match state {
        Some(state) if !state.is_empty() => render_state(&mut body, state),
        _ => body.push_str(
            "<div class=\"card\"><div class=\"card-body\">No data yet. Run <code>swap-harvest harvest</code> first.</div></div>",
        ),
    }

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <title>Cross-Chain Swap Analytics</title>\n<style>{}</style>\n</head>\n<body>\n\
         <div class=\"container\">\n<h1>Cross-Chain Swap Analytics</h1>\n{}\n</div>\n\
         <footer>Data from blockchain</footer>\n</body>\n</html>\n",
        STYLE, body
    )
}

fn render_state(out: &mut String, state: &AggregateState) {
    let total_liquidity: f64 = state.chains.values().filter_map(|chain| chain.liquidity.usd).sum();

    let _ = write!(
        out,
        "<div class=\"summary\">{}{}{}</div>",
        stat("Price", &state.price.map(|price| format!("${:.6}", price)).unwrap_or_else(|| "N/A".to_string())),
        stat("Total Liquidity", &format_usd(Some(total_liquidity))),
        stat(
            "Data Generated",
            &state.generated_at.map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string()).unwrap_or_else(|| "-".to_string())
        ),
    );

    render_window(out, "Past 1 Month Activity", state, |chain| &chain.short_window, &state.totals.short_window);
    render_window(out, "Past 3 Months Activity", state, |chain| &chain.long_window, &state.totals.long_window);
    render_liquidity(out, state, total_liquidity);

    let incomplete: Vec<&ChainResult> = state.chains.values().filter(|chain| !chain.is_complete()).collect();
    for chain in incomplete {
        let _ = write!(
            out,
            "<p class=\"warning\">{}: {} blocks could not be fetched, figures are a lower bound.</p>",
            escape_html(&chain.name),
            chain.missing_blocks()
        );
    }

    for chain in state.chains.values() {
        if let Some(price) = chain.price.filter(|price| Some(*price) != state.price) {
            let _ = write!(
                out,
                "<p class=\"warning\">{}: USD figures use the earlier price ${:.6}.</p>",
                escape_html(&chain.name),
                price
            );
        }
    }
}

fn render_window(
    out: &mut String,
    title: &str,
    state: &AggregateState,
    pick: fn(&ChainResult) -> &WindowSummary,
    totals: &WindowSummary,
) {
    let mut chains: Vec<&ChainResult> = state.chains.values().collect();
    chains.sort_by_key(|chain| std::cmp::Reverse(pick(chain).swap_count));

    let _ = write!(
        out,
        "<div class=\"card\"><div class=\"card-header\">{}</div><div class=\"card-body\">\
         <div class=\"summary\">{}{}</div>\
         <table><thead><tr><th>Rank</th><th>Chain</th><th>Swaps</th><th>Volume</th><th>Volume (USD)</th><th>%</th></tr></thead><tbody>",
        title,
        stat("Total Swaps", &format_number(totals.swap_count as f64, 0)),
        stat("Total Volume", &format_number(totals.volume_native, 0)),
    );
    for (rank, chain) in chains.iter().enumerate() {
        let window = pick(chain);
        let _ = write!(
            out,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            rank + 1,
            escape_html(&chain.name),
            format_number(window.swap_count as f64, 0),
            format_number(window.volume_native, 0),
            format_usd(window.volume_usd),
            share_bar(window.swap_count as f64, totals.swap_count as f64),
        );
    }
    out.push_str("</tbody></table></div></div>");
}

fn render_liquidity(out: &mut String, state: &AggregateState, total_liquidity: f64) {
    let mut chains: Vec<(&ChainResult, f64)> =
        state.chains.values().filter_map(|chain| chain.liquidity.usd.map(|usd| (chain, usd))).collect();
    chains.sort_by(|a, b| b.1.total_cmp(&a.1));

    out.push_str(
        "<div class=\"card\"><div class=\"card-header\">Current Liquidity by Chain</div><div class=\"card-body\">\
         <table><thead><tr><th>Rank</th><th>Chain</th><th>Tracked in Pool</th><th>Paired in Pool</th><th>Liquidity (USD)</th><th>%</th></tr></thead><tbody>",
    );
    for (rank, (chain, usd)) in chains.iter().enumerate() {
        let paired = chain
            .liquidity
            .paired_reserve
            .map(|reserve| format!("{} {}", format_number(reserve, 2), escape_html(&chain.liquidity.paired_asset)))
            .unwrap_or_else(|| "N/A".to_string());
        let _ = write!(
            out,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            rank + 1,
            escape_html(&chain.name),
            chain.liquidity.tracked_reserve.map(|reserve| format_number(reserve, 0)).unwrap_or_else(|| "N/A".to_string()),
            paired,
            format_usd(Some(*usd)),
            share_bar(*usd, total_liquidity),
        );
    }
    out.push_str("</tbody></table></div></div>");
}

fn stat(label: &str, value: &str) -> String {
    format!("<div class=\"stat\"><div class=\"stat-label\">{}</div><div class=\"stat-value\">{}</div></div>", label, value)
}

fn share_bar(part: f64, total: f64) -> String {
    let pct = if total > 0.0 { part / total * 100.0 } else { 0.0 };
    format!("<div class=\"bar\" style=\"width:{:.1}%\"></div><small>{:.1}%</small>", pct.min(100.0), pct)
}

fn format_usd(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("${}", format_number(value, 2)),
        None => "N/A".to_string(),
    }
}

/// `1234567.891` with 2 decimals -> `1,234,567.89`
fn format_number(value: f64, decimals: usize) -> String {
    if !value.is_finite() {
        return "N/A".to_string();
    }
    let formatted = format!("{:.*}", decimals, value.abs());
    let (integer, fraction) = match formatted.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = String::with_capacity(formatted.len() + integer.len() / 3 + 1);
    if value < 0.0 && formatted.bytes().any(|b| b.is_ascii_digit() && b != b'0') {
        grouped.push('-');
    }
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if let Some(fraction) = fraction {
        grouped.push('.');
        grouped.push_str(fraction);
    }
    grouped
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
            _ => escaped.push(c),
        }
    }
    escaped
}
