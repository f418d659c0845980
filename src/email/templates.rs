use chrono::NaiveDate;

use super::EmailMessage;

#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

impl RenderedEmail {
    pub fn to(self, recipient: &str) -> EmailMessage {
        EmailMessage {
            to: recipient.to_string(),
            subject: self.subject,
            html: self.html,
        }
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn layout(heading: &str, paragraphs: &[String], action: Option<(&str, &str)>) -> String {
    let mut body = String::new();
    for paragraph in paragraphs {
        body.push_str("<p style=\"margin:0 0 16px;line-height:1.5\">");
        body.push_str(paragraph);
        body.push_str("</p>");
    }
    if let Some((label, url)) = action {
        body.push_str(&format!(
            "<p style=\"margin:24px 0\"><a href=\"{}\" style=\"background:#4f46e5;color:#ffffff;\
             padding:12px 20px;border-radius:6px;text-decoration:none\">{}</a></p>",
            escape_html(url),
            escape_html(label)
        ));
    }

    format!(
        "<!DOCTYPE html><html><body style=\"font-family:Helvetica,Arial,sans-serif;\
         background:#f5f5f7;padding:24px\"><div style=\"max-width:560px;margin:0 auto;\
         background:#ffffff;border-radius:8px;padding:32px\"><h1 style=\"font-size:20px;\
         margin:0 0 24px\">{}</h1>{}<p style=\"color:#6b7280;font-size:12px;margin-top:32px\">\
         StartupMatch connects startup-support organizations with freelance experts.</p>\
         </div></body></html>",
        escape_html(heading),
        body
    )
}

pub fn welcome(full_name: &str, role_label: &str, dashboard_url: &str) -> RenderedEmail {
    RenderedEmail {
        subject: "Welcome to StartupMatch".to_string(),
        html: layout(
            &format!("Welcome, {full_name}!"),
            &[
                format!(
                    "Your {} account is ready. Finish your profile so the right people can find you.",
                    escape_html(role_label)
                ),
            ],
            Some(("Complete your profile", dashboard_url)),
        ),
    }
}

pub fn new_proposal(
    owner_name: &str,
    campaign_title: &str,
    expert_name: &str,
    link: &str,
) -> RenderedEmail {
    RenderedEmail {
        subject: format!("New proposal for \"{campaign_title}\""),
        html: layout(
            "You received a new proposal",
            &[
                format!("Hi {},", escape_html(owner_name)),
                format!(
                    "{} submitted a proposal for your campaign <strong>{}</strong>.",
                    escape_html(expert_name),
                    escape_html(campaign_title)
                ),
            ],
            Some(("Review proposals", link)),
        ),
    }
}

pub fn proposal_accepted(expert_name: &str, campaign_title: &str, link: &str) -> RenderedEmail {
    RenderedEmail {
        subject: format!("Your proposal for \"{campaign_title}\" was accepted"),
        html: layout(
            "Congratulations!",
            &[
                format!("Hi {},", escape_html(expert_name)),
                format!(
                    "Your proposal for <strong>{}</strong> was accepted. \
                     Say hello to the organization and agree on the first tasks.",
                    escape_html(campaign_title)
                ),
            ],
            Some(("Open the campaign", link)),
        ),
    }
}

pub fn proposal_rejected(expert_name: &str, campaign_title: &str, link: &str) -> RenderedEmail {
    RenderedEmail {
        subject: format!("Update on your proposal for \"{campaign_title}\""),
        html: layout(
            "Thanks for applying",
            &[
                format!("Hi {},", escape_html(expert_name)),
                format!(
                    "The organization behind <strong>{}</strong> chose another proposal. \
                     New campaigns are posted every week.",
                    escape_html(campaign_title)
                ),
            ],
            Some(("Browse open campaigns", link)),
        ),
    }
}

pub fn campaign_deadline_reminder(
    owner_name: &str,
    campaign_title: &str,
    deadline: NaiveDate,
    pending_proposals: i64,
    link: &str,
) -> RenderedEmail {
    let pending = match pending_proposals {
        0 => "There are no pending proposals yet.".to_string(),
        1 => "One proposal is waiting for your decision.".to_string(),
        n => format!("{n} proposals are waiting for your decision."),
    };
    RenderedEmail {
        subject: format!("\"{campaign_title}\" closes on {}", deadline.format("%B %-d")),
        html: layout(
            "Your campaign deadline is approaching",
            &[
                format!("Hi {},", escape_html(owner_name)),
                format!(
                    "<strong>{}</strong> reaches its deadline on {}.",
                    escape_html(campaign_title),
                    deadline.format("%A, %B %-d, %Y")
                ),
                pending,
            ],
            Some(("Review the campaign", link)),
        ),
    }
}

pub fn task_due_reminder(
    assignee_name: &str,
    task_title: &str,
    campaign_title: &str,
    due: NaiveDate,
    link: &str,
) -> RenderedEmail {
    RenderedEmail {
        subject: format!("Task due soon: {task_title}"),
        html: layout(
            "A task is due soon",
            &[
                format!("Hi {},", escape_html(assignee_name)),
                format!(
                    "<strong>{}</strong> in {} is due on {}.",
                    escape_html(task_title),
                    escape_html(campaign_title),
                    due.format("%A, %B %-d")
                ),
            ],
            Some(("Open tasks", link)),
        ),
    }
}

pub fn admin_message(subject: &str, message: &str) -> RenderedEmail {
    let paragraphs: Vec<String> = message
        .split("\n\n")
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| escape_html(chunk).replace('\n', "<br>"))
        .collect();
    RenderedEmail {
        subject: subject.to_string(),
        html: layout(subject, &paragraphs, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html("<b>\"Tom & Jerry's\"</b>"),
            "&lt;b&gt;&quot;Tom &amp; Jerry&#39;s&quot;&lt;/b&gt;"
        );
    }

    #[test]
    fn user_content_is_escaped_in_templates() {
        let email = new_proposal(
            "Org",
            "<script>alert(1)</script>",
            "Eve",
            "https://app/campaigns/1",
        );
        assert!(!email.html.contains("<script>"));
        assert!(email.html.contains("&lt;script&gt;"));
        assert!(email.html.contains("href=\"https://app/campaigns/1\""));
    }

    #[test]
    fn reminder_mentions_pending_count() {
        let deadline = NaiveDate::from_ymd_opt(2026, 11, 3).unwrap();
        let email = campaign_deadline_reminder("Ann", "Pitch deck", deadline, 2, "https://x");
        assert_eq!(email.subject, "\"Pitch deck\" closes on November 3");
        assert!(email.html.contains("2 proposals are waiting"));
        assert!(email.html.contains("Tuesday, November 3, 2026"));
    }

    #[test]
    fn admin_message_keeps_paragraphs() {
        let email = admin_message("Maintenance", "Line one\nline two\n\nSecond <para>");
        assert!(email.html.contains("Line one<br>line two"));
        assert!(email.html.contains("Second &lt;para&gt;"));
        let message = email.to("ops@example.com");
        assert_eq!(message.to, "ops@example.com");
    }
}
