use super::reply::Reply;

/// Service extensions a relay advertised in its EHLO reply.
///
/// A relay greeted with HELO advertises nothing, which is what
/// [`Capabilities::default`] describes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    starttls: bool,
    auth: Vec<String>,
    /// `Some(0)` when SIZE is advertised without a limit.
    size: Option<usize>,
    eight_bit_mime: bool,
    pipelining: bool,
    other: Vec<String>,
}

impl Capabilities {
    /// Reads the extension lines of an EHLO reply. The first line is the
    /// relay's own greeting and carries no extension.
    #[must_use]
    pub fn from_ehlo(reply: &Reply) -> Self {
        let mut capabilities = Self::default();

        for line in reply.lines.iter().skip(1) {
            let mut words = line.split_whitespace();
            let Some(keyword) = words.next() else {
                continue;
            };
            let keyword = keyword.to_ascii_uppercase();

            // Some relays still advertise the pre-standard `AUTH=LOGIN` form.
            if let Some(mechanisms) = keyword.strip_prefix("AUTH=") {
                capabilities.add_mechanisms(mechanisms.split(','));
                capabilities.add_mechanisms(words);
                continue;
            }

            match keyword.as_str() {
                "STARTTLS" => capabilities.starttls = true,
                "AUTH" => capabilities.add_mechanisms(words),
                "SIZE" => {
                    capabilities.size = Some(
                        words
                            .next()
                            .and_then(|limit| limit.parse().ok())
                            .unwrap_or_default(),
                    );
                }
                "8BITMIME" => capabilities.eight_bit_mime = true,
                "PIPELINING" => capabilities.pipelining = true,
                _ => capabilities.other.push(keyword),
            }
        }

        capabilities
    }

    fn add_mechanisms<'a>(&mut self, mechanisms: impl IntoIterator<Item = &'a str>) {
        for mechanism in mechanisms {
            let mechanism = mechanism.to_ascii_uppercase();
            if !mechanism.is_empty() && !self.auth.contains(&mechanism) {
                self.auth.push(mechanism);
            }
        }
    }

    #[must_use]
    pub const fn starttls(&self) -> bool {
        self.starttls
    }

    /// Advertised AUTH mechanisms, upper-cased, in the relay's order.
    #[must_use]
    pub fn auth_mechanisms(&self) -> &[String] {
        &self.auth
    }

    #[must_use]
    pub fn supports_auth(&self, mechanism: &str) -> bool {
        self.auth.iter().any(|m| m.eq_ignore_ascii_case(mechanism))
    }

    /// The advertised SIZE limit; `Some(0)` means no fixed limit.
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        self.size
    }

    #[must_use]
    pub const fn eight_bit_mime(&self) -> bool {
        self.eight_bit_mime
    }

    #[must_use]
    pub const fn pipelining(&self) -> bool {
        self.pipelining
    }

    /// Whether `keyword` was advertised at all.
    #[must_use]
    pub fn supports(&self, keyword: &str) -> bool {
        match keyword.to_ascii_uppercase().as_str() {
            "STARTTLS" => self.starttls,
            "AUTH" => !self.auth.is_empty(),
            "SIZE" => self.size.is_some(),
            "8BITMIME" => self.eight_bit_mime,
            "PIPELINING" => self.pipelining,
            other => self.other.iter().any(|k| k == other),
        }
    }

    /// Every advertised keyword, in a stable order, for display.
    #[must_use]
    pub fn keywords(&self) -> Vec<String> {
        let mut keywords = Vec::new();
        if self.starttls {
            keywords.push("STARTTLS".to_string());
        }
        if !self.auth.is_empty() {
            keywords.push(format!("AUTH {}", self.auth.join(" ")));
        }
        match self.size {
            Some(0) => keywords.push("SIZE".to_string()),
            Some(limit) => keywords.push(format!("SIZE {limit}")),
            None => {}
        }
        if self.eight_bit_mime {
            keywords.push("8BITMIME".to_string());
        }
        if self.pipelining {
            keywords.push("PIPELINING".to_string());
        }
        keywords.extend(self.other.iter().cloned());
        keywords
    }
}
