use std::collections::HashSet;

pub const MAX_HASHTAGS: usize = 12;
const MAX_TAG_LENGTH: usize = 40;

/// Turns free-form labels into `#lower-case-tags`, first occurrence wins.
pub fn generate_hashtags<'a, I>(sources: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut tags = Vec::new();

    for source in sources {
        let Some(tag) = normalize(source) else {
            continue;
        };
        if seen.insert(tag.clone()) {
            tags.push(tag);
            if tags.len() == MAX_HASHTAGS {
                break;
            }
        }
    }

    tags
}

fn normalize(source: &str) -> Option<String> {
    let mut slug = String::with_capacity(source.len());
    let mut pending_dash = false;

    for ch in source.trim().trim_start_matches('#').chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else if ch == '+' {
            // keep "c++" distinct from "c"
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push_str("plus");
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        return None;
    }

    let truncated: String = slug.chars().take(MAX_TAG_LENGTH).collect();
    Some(format!("#{}", truncated.trim_end_matches('-')))
}
