use scraper::{Html, Selector};

/// Content shorter than this is treated as extraction failure.
const MIN_CONTENT_LEN: usize = 100;
/// Hard cap on extracted content.
const MAX_CONTENT_LEN: usize = 50_000;
/// Cap for the body-text fallback.
const MAX_FALLBACK_LEN: usize = 10_000;

/// Containers commonly wrapping the article body, tried in order.
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    ".article-content",
    ".post-content",
    ".entry-content",
    "#article-body",
    ".article-body",
    ".story-body",
    ".content",
];

fn sel(selector: &str) -> Selector {
    Selector::parse(selector).expect("static selector")
}

/// Extract the article title: og:title, then `<title>`, then the first h1.
pub fn extract_title(document: &Html) -> Option<String> {
    if let Some(meta) = document.select(&sel(r#"meta[property="og:title"]"#)).next() {
        if let Some(content) = meta.value().attr("content") {
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    if let Some(title) = document.select(&sel("title")).next() {
        let text = title.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return Some(text);
        }
    }

    if let Some(h1) = document.select(&sel("h1")).next() {
        let text = h1.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return Some(text);
        }
    }

    None
}

/// Extract the main article text using several strategies, roughly from the
/// most to the least specific.
pub fn extract_content(document: &Html) -> Option<String> {
    // Strategy 1: a semantic <article> element.
    if let Some(article) = document.select(&sel("article")).next() {
        let text = clean_text(&element_text(&article));
        if text.len() > MIN_CONTENT_LEN {
            return Some(text);
        }
    }

    // Strategy 2: common article containers.
    for selector in CONTENT_SELECTORS {
        if let Some(element) = document.select(&sel(selector)).next() {
            let text = clean_text(&element_text(&element));
            if text.len() > MIN_CONTENT_LEN {
                return Some(text);
            }
        }
    }

    // Strategy 3: the div with the most paragraphs.
    let p = sel("p");
    let mut best: Option<(usize, scraper::ElementRef)> = None;
    for div in document.select(&sel("div")) {
        let count = div.select(&p).count();
        if count > best.map_or(0, |(n, _)| n) {
            best = Some((count, div));
        }
    }
    if let Some((count, div)) = best {
        if count >= 3 {
            let text = clean_text(&element_text(&div));
            if text.len() > MIN_CONTENT_LEN {
                return Some(text);
            }
        }
    }

    // Strategy 4: every substantial paragraph on the page.
    let paragraphs: Vec<String> = document
        .select(&p)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|text| text.len() > 50)
        .collect();
    if !paragraphs.is_empty() {
        return Some(truncate(paragraphs.join("\n\n"), MAX_CONTENT_LEN));
    }

    // Fallback: raw body text, capped.
    if let Some(body) = document.select(&sel("body")).next() {
        let text = clean_text(&element_text(&body));
        if !text.is_empty() {
            return Some(truncate(text, MAX_FALLBACK_LEN));
        }
    }

    None
}

/// Collect an element's text, skipping script/style/nav chrome.
fn element_text(element: &scraper::ElementRef) -> String {
    const SKIP: &[&str] = &[
        "script", "style", "nav", "header", "footer", "aside", "form", "iframe", "noscript",
    ];

    let mut out = String::new();
    for node in element.descendants() {
        if let Some(text) = node.value().as_text() {
            let inside_skipped = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|el| SKIP.contains(&el.name()))
            });
            if !inside_skipped {
                out.push_str(text);
                out.push('\n');
            }
        }
    }
    out
}

/// Collapse whitespace: trim lines, drop empties, cap the total length.
fn clean_text(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    truncate(lines.join("\n\n"), MAX_CONTENT_LEN)
}

fn truncate(mut text: String, limit: usize) -> String {
    if text.len() > limit {
        let mut cut = limit;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}
