//! Payloads for the messages the intake system posts to Slack.

use intake_core::domain::fields::text_field;
use intake_core::{AttachmentInput, ClientRequest, Estimate, FieldMap, FieldValue, Invoice};

use crate::blocks::{escape_mrkdwn, link, ButtonElement, ButtonStyle, MessageBuilder, MessageTemplate};

pub const INTAKE_HEADER_BLOCK_ID: &str = "intake.header.v1";
pub const INTAKE_CONTACT_BLOCK_ID: &str = "intake.contact.v1";
pub const INTAKE_NEEDS_BLOCK_ID: &str = "intake.needs.v1";
pub const INTAKE_SCHEDULING_BLOCK_ID: &str = "intake.scheduling.v1";
pub const INTAKE_ATTACHMENTS_BLOCK_ID: &str = "intake.attachments.v1";
pub const INTAKE_ACTIONS_BLOCK_ID: &str = "intake.actions.v1";
pub const INTAKE_CONTEXT_BLOCK_ID: &str = "intake.context.v1";
pub const OPEN_IN_ADMIN_ACTION_ID: &str = "intake.open_admin.v1";

pub const REQUEST_SUMMARY_BLOCK_ID: &str = "request.summary.v1";
pub const REQUEST_ADDON_BLOCK_ID: &str = "request.addon.v1";
pub const REQUEST_UPDATE_BLOCK_ID: &str = "request.update.v1";
pub const INVOICE_SENT_BLOCK_ID: &str = "invoice.sent.v1";

const NOT_PROVIDED: &str = "-";

/// Announcement posted once per submitted conversation.
pub fn intake_submitted_message(
    conversation_id: &str,
    fields: &FieldMap,
    attachments: &[AttachmentInput],
    admin_base_url: &str,
) -> MessageTemplate {
    let name = text_field(fields, "full_name").unwrap_or("Unknown contact");
    let company = text_field(fields, "business_name");
    let fallback = match company {
        Some(company) => format!("New intake from {name} ({company})"),
        None => format!("New intake from {name}"),
    };
    let needs = text_field(fields, "needs_summary")
        .or_else(|| text_field(fields, "summary"))
        .unwrap_or("No summary provided");
    let admin_url = format!(
        "{}/admin/conversations/{}",
        admin_base_url.trim_end_matches('/'),
        urlencoding::encode(conversation_id)
    );

    let mut builder = MessageBuilder::new(fallback)
        .header(INTAKE_HEADER_BLOCK_ID, "New intake submitted")
        .section(INTAKE_CONTACT_BLOCK_ID, |section| {
            section
                .mrkdwn(format!("*{}*", escape_mrkdwn(name)))
                .field("Email", or_dash(text_field(fields, "email")))
                .field("Phone", or_dash(text_field(fields, "phone")))
                .field("Preferred channel", or_dash(text_field(fields, "preferred_contact_channel")))
                .field("Company", or_dash(company));
        })
        .section(INTAKE_NEEDS_BLOCK_ID, |section| {
            section
                .mrkdwn(format!("*Needs*\n{}", escape_mrkdwn(needs)))
                .field("Urgency", or_dash(text_field(fields, "urgency")))
                .field("Budget", or_dash(text_field(fields, "budget_band")));
        })
        .section(INTAKE_SCHEDULING_BLOCK_ID, |section| {
            section.mrkdwn(format!("*Scheduling*\n{}", scheduling_line(fields)));
        });

    if !attachments.is_empty() {
        let lines = attachments
            .iter()
            .map(|attachment| format!("• {}", link(&attachment.url, &attachment.file_name)))
            .collect::<Vec<_>>()
            .join("\n");
        builder = builder.section(INTAKE_ATTACHMENTS_BLOCK_ID, |section| {
            section.mrkdwn(format!("*Attachments ({})*\n{lines}", attachments.len()));
        });
    }

    builder
        .actions(INTAKE_ACTIONS_BLOCK_ID, |actions| {
            actions.button(
                ButtonElement::new(OPEN_IN_ADMIN_ACTION_ID, "Open in admin")
                    .style(ButtonStyle::Primary)
                    .url(admin_url),
            );
        })
        .context(INTAKE_CONTEXT_BLOCK_ID, |context| {
            context.mrkdwn(format!("conversation `{}`", escape_mrkdwn(conversation_id)));
        })
        .build()
}

fn scheduling_line(fields: &FieldMap) -> String {
    if fields.get("skip_scheduling").is_some_and(FieldValue::is_truthy) {
        return "Skipped".to_string();
    }

    let mut parts = Vec::new();
    if let Some(option) = text_field(fields, "scheduling_option") {
        parts.push(escape_mrkdwn(option));
    }
    if let Some(url) = text_field(fields, "booking_url") {
        parts.push(link(url, "booking link"));
    }
    match fields.get("preferred_times") {
        Some(FieldValue::List(items)) => {
            let times = items.iter().filter_map(FieldValue::display_scalar).collect::<Vec<_>>();
            if !times.is_empty() {
                parts.push(escape_mrkdwn(&times.join(", ")));
            }
        }
        Some(value) => {
            if let Some(times) = value.display_scalar().filter(|times| !times.trim().is_empty()) {
                parts.push(escape_mrkdwn(&times));
            }
        }
        None => {}
    }
    if let Some(timezone) = text_field(fields, "timezone") {
        parts.push(format!("({})", escape_mrkdwn(timezone)));
    }

    if parts.is_empty() {
        NOT_PROVIDED.to_string()
    } else {
        parts.join(" · ")
    }
}

fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or(NOT_PROVIDED)
}

/// Thread root for a new client request. Updates and invoice follow-ups reply
/// under the returned `ts`.
pub fn request_thread_message(
    request: &ClientRequest,
    project_name: &str,
    estimate: &Estimate,
) -> MessageTemplate {
    let fallback = format!(
        "New {} request for {}: {}",
        request.request_type.as_str(),
        project_name,
        request.description
    );

    let mut builder = MessageBuilder::new(fallback).section(REQUEST_SUMMARY_BLOCK_ID, |section| {
        section
            .mrkdwn(format!(
                "*New {} request* for *{}*\n{}",
                request.request_type.as_str(),
                escape_mrkdwn(project_name),
                escape_mrkdwn(&request.description)
            ))
            .field("Impact", request.impact.as_str())
            .field("Urgency", &request.urgency)
            .field("Draft estimate", &format_amount(estimate.amount_cents, &estimate.currency));
    });

    if request.addon_flag {
        let rationale = request.addon_rationale.as_deref().unwrap_or("flagged as add-on");
        builder = builder.context(REQUEST_ADDON_BLOCK_ID, |context| {
            context.mrkdwn(format!(":warning: Possible add-on: {}", escape_mrkdwn(rationale)));
        });
    }

    builder.build()
}

pub fn request_update_message(body: &str) -> MessageTemplate {
    MessageBuilder::new(format!("Client update: {body}"))
        .section(REQUEST_UPDATE_BLOCK_ID, |section| {
            section.mrkdwn(format!("*Client update*\n{}", escape_mrkdwn(body)));
        })
        .build()
}

pub fn invoice_sent_message(invoice: &Invoice) -> MessageTemplate {
    let amount = format_amount(invoice.amount_cents, &invoice.currency);
    let text = match invoice.provider_invoice_url.as_deref() {
        Some(url) => format!("Invoice sent for {amount}: {}", link(url, "view invoice")),
        None => format!("Invoice sent for {amount}"),
    };

    MessageBuilder::new(format!("Invoice sent for {amount}"))
        .section(INVOICE_SENT_BLOCK_ID, |section| {
            section.mrkdwn(text);
        })
        .build()
}

/// `12345, "usd"` renders as `123.45 USD`.
pub fn format_amount(amount_cents: i64, currency: &str) -> String {
    let sign = if amount_cents < 0 { "-" } else { "" };
    let cents = amount_cents.unsigned_abs();
    format!("{sign}{}.{:02} {}", cents / 100, cents % 100, currency.to_ascii_uppercase())
}
