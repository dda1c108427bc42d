//! Notice wording and MIME message assembly.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything needed to word an ownership-transfer notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoticeTemplate {
    /// Name of the organization asking for the transfer.
    pub organization: String,
    /// Account that should end up owning the files.
    pub owner_target_email: String,
    /// ID of the shared Drive folder holding the files.
    pub drive_folder: String,
    /// Resource key from the folder's share link.
    pub resource_key: String,
    /// Where recipients can ask for help; defaults to the target account.
    #[serde(default)]
    pub contact: Option<String>,
}

impl NoticeTemplate {
    /// Subject line.
    pub fn subject(&self) -> String {
        format!(
            "[Action Required] {} Drive migration notice",
            self.organization
        )
    }

    /// Drive view listing only the files `owner` owns in the folder.
    pub fn owner_link(&self, owner: &str) -> String {
        format!(
            "https://drive.google.com/drive/u/0/folders/{folder}?resourcekey={key}&q=owner:{owner}%20parent:{folder}",
            folder = self.drive_folder,
            key = self.resource_key,
            owner = owner,
        )
    }

    fn contact(&self) -> &str {
        self.contact.as_deref().unwrap_or(&self.owner_target_email)
    }

    fn steps(&self) -> [String; 7] {
        let target = &self.owner_target_email;
        [
            "Open the list of your files with the link above.".to_string(),
            "Select every file in the list (Ctrl+A, or Cmd+A on a Mac).".to_string(),
            "Click the Share button.".to_string(),
            format!("Add {} as an Editor and press Send.", target),
            "Click the Share button again.".to_string(),
            format!(
                "Next to {}, open the role menu and choose Transfer ownership.",
                target
            ),
            "Confirm the transfer.".to_string(),
        ]
    }

    /// Plain-text body for `owner`, who owns `file_count` files.
    pub fn render_text(&self, owner: &str, file_count: usize) -> String {
        let mut body = format!(
            "Hello,\n\n\
             You own {count} in the {org} shared Drive folder. We are consolidating \
             these files under an account managed by {org}, and only the current \
             owner can hand ownership over, so we need a few minutes of your time.\n\n\
             Your files: {link}\n\n",
            count = plural_files(file_count),
            org = self.organization,
            link = self.owner_link(owner),
        );
        for (n, step) in self.steps().iter().enumerate() {
            body.push_str(&format!("{}. {}\n", n + 1, step));
        }
        body.push_str(&format!(
            "\nTransferring ownership keeps revision history and comments attached to \
             the files. If anything goes wrong, write to {}.\n\n\
             Thank you,\n{}\n",
            self.contact(),
            self.organization
        ));
        body
    }

    /// HTML body for `owner`, who owns `file_count` files.
    pub fn render_html(&self, owner: &str, file_count: usize) -> String {
        let org = escape_html(&self.organization);
        let link = escape_html(&self.owner_link(owner));

        let mut body = format!(
            "<html><body>\n\
             <p>Hello,</p>\n\
             <p>You own {count} in the {org} shared Drive folder. We are consolidating \
             these files under an account managed by {org}, and only the current owner \
             can hand ownership over, so we need a few minutes of your time.</p>\n\
             <p><a href=\"{link}\">Open the list of your files</a></p>\n<ol>\n",
            count = plural_files(file_count),
            org = org,
            link = link,
        );
        for step in self.steps() {
            body.push_str(&format!("<li>{}</li>\n", escape_html(&step)));
        }
        body.push_str(&format!(
            "</ol>\n\
             <p>Transferring ownership keeps revision history and comments attached to \
             the files. If anything goes wrong, write to {}.</p>\n\
             <p>Thank you,<br>{}</p>\n\
             </body></html>\n",
            escape_html(self.contact()),
            org
        ));
        body
    }
}

fn plural_files(count: usize) -> String {
    match count {
        1 => "1 file".to_string(),
        n => format!("{} files", n),
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// A composed RFC 5322 message with plain and HTML alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeMessage {
    /// Sender address.
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text alternative.
    pub text: String,
    /// HTML alternative.
    pub html: String,
    boundary: String,
}

impl MimeMessage {
    /// Message with a fresh part boundary.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        text: impl Into<String>,
        html: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            text: text.into(),
            html: html.into(),
            boundary: format!("part-{}", Uuid::new_v4().simple()),
        }
    }

    /// Wire form of the message, CRLF line endings.
    pub fn to_rfc5322(&self) -> String {
        let mut out = String::new();
        push_line(&mut out, &format!("From: {}", self.from));
        push_line(&mut out, &format!("To: {}", self.to));
        push_line(&mut out, &format!("Subject: {}", encode_header(&self.subject)));
        push_line(&mut out, "MIME-Version: 1.0");
        push_line(
            &mut out,
            &format!(
                "Content-Type: multipart/alternative; boundary=\"{}\"",
                self.boundary
            ),
        );
        push_line(&mut out, "");

        for (subtype, content) in [("plain", &self.text), ("html", &self.html)] {
            push_line(&mut out, &format!("--{}", self.boundary));
            push_line(
                &mut out,
                &format!("Content-Type: text/{}; charset=\"utf-8\"", subtype),
            );
            push_line(&mut out, "Content-Transfer-Encoding: base64");
            push_line(&mut out, "");
            let encoded = STANDARD.encode(content.as_bytes());
            // Encoded text is ASCII, so byte chunks are valid UTF-8.
            for chunk in encoded.as_bytes().chunks(76) {
                push_line(&mut out, &String::from_utf8_lossy(chunk));
            }
        }
        push_line(&mut out, &format!("--{}--", self.boundary));
        out
    }

    /// URL-safe base64 of the wire form, as the Gmail API expects in `raw`.
    pub fn raw(&self) -> String {
        URL_SAFE.encode(self.to_rfc5322().as_bytes())
    }
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push_str("\r\n");
}

/// RFC 2047 encoded-word for non-ASCII header values.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

/// Compose the notice for `to`, who owns `file_count` files.
pub fn compose(from: &str, to: &str, file_count: usize, template: &NoticeTemplate) -> MimeMessage {
    MimeMessage::new(
        from,
        to,
        template.subject(),
        template.render_text(to, file_count),
        template.render_html(to, file_count),
    )
}
