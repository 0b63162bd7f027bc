//! Canned replies for the FAQ chat widget.
//!
//! Stands in for a real chat backend: the input is lower-cased and checked
//! against an ordered keyword table, first match wins.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    SellingProcess,
    Security,
    Valuation,
    Turnaround,
    Fallback,
}

impl Reply {
    pub fn text(&self) -> &'static str {
        match self {
            Reply::SellingProcess => "Selling your license with SoftSell is easy! Just upload your license details through our secure portal, receive a valuation within 24 hours, and get paid once you accept our offer. Would you like to start the process now?",
            Reply::Security => "Absolutely! Security is our top priority. We use end-to-end encryption for all license data. We only need specific non-sensitive details to validate your license, and our process is compliant with industry security standards.",
            Reply::Valuation => "License values vary based on software type, version, and remaining validity period. Our proprietary valuation algorithm ensures you get the best market price. Upload your license details for a free, no-obligation quote!",
            Reply::Turnaround => "The entire process typically takes 2-5 business days from submission to payment. Valuation is usually completed within 24 hours, and payment is processed within 1-3 business days after you accept our offer.",
            Reply::Fallback => "Thanks for your message! Our team is ready to help with your software license needs. Could you please provide more details about your specific situation, or tell me which software licenses you're looking to sell?",
        }
    }
}

pub struct Rule {
    pub keywords: &'static [&'static str],
    pub reply: Reply,
}

impl Rule {
    fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|k| lowered.contains(k))
    }
}

/// Evaluated top to bottom. Order is the priority.
pub const RULES: [Rule; 4] = [
    Rule {
        keywords: &["sell", "how"],
        reply: Reply::SellingProcess,
    },
    Rule {
        keywords: &["safe", "security", "secure"],
        reply: Reply::Security,
    },
    Rule {
        keywords: &["price", "worth", "value"],
        reply: Reply::Valuation,
    },
    Rule {
        keywords: &["time", "long"],
        reply: Reply::Turnaround,
    },
];

pub fn classify(input: &str) -> Reply {
    let lowered = input.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.matches(&lowered))
        .map(|rule| rule.reply)
        .unwrap_or(Reply::Fallback)
}

/// Produces the bot's answer to a visitor message.
pub trait Responder: Send + Sync {
    fn respond(&self, input: &str) -> String;
}

#[derive(Debug, Default, Clone)]
pub struct KeywordResponder;

impl Responder for KeywordResponder {
    fn respond(&self, input: &str) -> String {
        classify(input).text().to_string()
    }
}
