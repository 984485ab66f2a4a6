//! Document categorization seam and the default keyword heuristic.

/// Outcome of categorizing one document.
#[derive(Debug, Clone)]
pub struct CategoryMatch {
    pub category: String,
    /// Normalized to 0.0..=1.0.
    pub confidence: f64,
    pub matched_terms: Vec<String>,
}

/// Assigns a category to a document from its filename and extracted text.
pub trait Categorizer: Send + Sync {
    fn categorize(&self, filename: &str, text: &str) -> CategoryMatch;
}

/// Score for any keyword occurrence.
const KEYWORD_SCORE: f64 = 10.0;
/// Bonus when the keyword appears on its own word boundaries.
const WORD_BOUNDARY_BONUS: f64 = 5.0;
/// Bonus when the keyword appears in the filename itself.
const FILENAME_BONUS: f64 = 10.0;
/// Score at which confidence saturates at 1.0.
const CONFIDENCE_CEILING: f64 = 50.0;

struct CategoryDef {
    name: &'static str,
    /// Lower number wins ties between categories with similar raw scores.
    priority: u32,
    keywords: &'static [&'static str],
}

// Multi-word keywords are stored normalized (lowercase, single spaces)
// because matching runs on normalized text.
const CATEGORIES: &[CategoryDef] = &[
    CategoryDef {
        name: "invoice",
        priority: 2,
        keywords: &[
            "invoice", "bill", "receipt", "purchase", "payment due", "amount due", "subtotal",
            "total", "tax", "vat", "gst", "invoice number", "bill number", "vendor", "supplier",
            "due date", "payment terms", "remit to", "billing",
        ],
    },
    CategoryDef {
        name: "medical",
        priority: 3,
        keywords: &[
            "medical", "prescription", "pharmacy", "doctor", "hospital", "clinic", "health",
            "medicare", "medicaid", "insurance claim", "patient", "diagnosis", "treatment",
            "medication", "rx", "physician", "nurse", "lab", "test results",
        ],
    },
    CategoryDef {
        name: "insurance",
        priority: 4,
        keywords: &[
            "insurance", "policy", "premium", "claim", "coverage", "deductible", "policyholder",
            "beneficiary", "underwriter", "liability", "auto insurance", "home insurance",
            "life insurance", "health insurance", "claim number",
        ],
    },
    CategoryDef {
        name: "tax",
        priority: 5,
        keywords: &[
            "tax", "irs", "form", "1040", "w2", "w4", "1099", "deduction", "refund",
            "withholding", "filing", "return", "federal", "state", "income tax", "property tax",
            "sales tax", "tax year", "ein", "ssn", "tax id",
        ],
    },
    CategoryDef {
        name: "financial",
        priority: 6,
        keywords: &[
            "bank", "statement", "account", "balance", "transaction", "deposit", "withdrawal",
            "loan", "mortgage", "credit", "investment", "portfolio", "savings", "checking",
            "routing", "swift", "iban", "interest", "dividend",
        ],
    },
    CategoryDef {
        name: "warranty",
        priority: 7,
        keywords: &[
            "warranty", "guarantee", "warrantee", "coverage", "repair", "replacement",
            "product registration", "serial number", "model number", "manufacturer", "defect",
            "malfunction", "terms and conditions", "expiration", "valid until",
        ],
    },
    CategoryDef {
        name: "utility",
        priority: 8,
        keywords: &[
            "utility", "electric", "electricity", "gas", "water", "sewer", "internet", "cable",
            "phone", "wireless", "cellular", "broadband", "service", "usage", "meter",
            "kilowatt", "kwh", "therms", "gallons", "data", "minutes",
        ],
    },
    CategoryDef {
        name: "legal",
        priority: 9,
        keywords: &[
            "legal", "contract", "agreement", "lease", "rental", "terms", "conditions",
            "attorney", "lawyer", "court", "lawsuit", "settlement", "notary", "witness",
            "signature", "bind", "obligation", "clause", "amendment", "addendum",
        ],
    },
    CategoryDef {
        name: "employment",
        priority: 10,
        keywords: &[
            "employment", "payroll", "paystub", "salary", "wage", "employee", "employer", "hr",
            "human resources", "benefits", "vacation", "sick leave", "pension", "401k",
            "offer letter", "termination", "resignation", "performance review",
        ],
    },
    CategoryDef {
        name: "automotive",
        priority: 11,
        keywords: &[
            "vehicle", "car", "auto", "automotive", "registration", "title", "license",
            "maintenance", "repair", "service", "oil change", "inspection", "smog", "emissions",
            "vin", "mileage", "dealer", "garage", "mechanic", "parts",
        ],
    },
    CategoryDef {
        name: "real_estate",
        priority: 12,
        keywords: &[
            "real estate", "property", "deed", "mortgage", "escrow", "closing", "title",
            "appraisal", "inspection", "realtor", "agent", "broker", "listing", "mls", "hoa",
            "homeowners association", "property tax", "assessment", "survey",
        ],
    },
    CategoryDef {
        name: "subscription",
        priority: 13,
        keywords: &[
            "subscription", "recurring", "monthly", "annual", "membership", "service",
            "streaming", "software", "saas", "renewal", "auto pay", "billing cycle", "netflix",
            "spotify", "amazon prime", "office 365", "adobe", "gym",
        ],
    },
    CategoryDef {
        name: "government",
        priority: 14,
        keywords: &[
            "government", "federal", "state", "local", "department", "agency", "bureau",
            "passport", "visa", "license", "permit", "certificate", "dmv", "social security",
            "unemployment", "benefits", "veteran", "military", "court", "jury", "voting",
        ],
    },
    CategoryDef {
        name: "business",
        priority: 15,
        keywords: &[
            "business", "company", "corporation", "llc", "partnership", "contract", "vendor",
            "supplier", "client", "customer", "proposal", "quote", "estimate", "purchase order",
            "delivery", "shipping", "tracking", "wholesale", "retail",
        ],
    },
    CategoryDef {
        name: "travel",
        priority: 16,
        keywords: &[
            "travel", "flight", "airline", "hotel", "reservation", "booking", "ticket",
            "itinerary", "boarding pass", "passport", "visa", "customs", "immigration",
            "rental car", "cruise", "vacation", "trip", "departure", "arrival", "gate",
        ],
    },
    CategoryDef {
        name: "education",
        priority: 17,
        keywords: &[
            "education", "school", "university", "college", "transcript", "diploma",
            "certificate", "degree", "student", "tuition", "scholarship", "financial aid",
            "loan", "grant", "enrollment", "registration", "class", "course", "grade",
        ],
    },
    CategoryDef {
        name: "personal",
        priority: 18,
        keywords: &[
            "personal", "family", "birth certificate", "marriage", "divorce", "death",
            "adoption", "custody", "child support", "alimony", "inheritance", "will", "trust",
            "estate", "power of attorney", "guardian", "conservator",
        ],
    },
];

/// Fallback category when nothing matches.
pub const FALLBACK_CATEGORY: &str = "other";

/// Keyword-scoring categorizer.
///
/// Scores each category by keyword occurrences in the combined filename
/// and text, with bonuses for word-boundary and filename matches, then
/// weights by category priority. Confidence is the winning score
/// normalized against a fixed ceiling.
#[derive(Default)]
pub struct KeywordCategorizer;

impl KeywordCategorizer {
    pub fn new() -> Self {
        Self
    }
}

/// Lowercase, replace punctuation with spaces, and collapse whitespace
/// runs so keyword matching only has to think about single-space
/// separated words. Collapsing matters for multi-word keywords:
/// "payment, due" must still contain "payment due".
fn normalize(s: &str) -> String {
    let spaced: String = s
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c
            } else {
                ' '
            }
        })
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True when `keyword` occurs in `content` delimited by spaces or the
/// string edges. Works on normalized content only.
fn word_boundary_match(content: &str, keyword: &str) -> bool {
    let bytes = content.as_bytes();
    let mut start = 0;
    while let Some(pos) = content[start..].find(keyword) {
        let begin = start + pos;
        let end = begin + keyword.len();
        let before_ok = begin == 0 || bytes[begin - 1] == b' ';
        let after_ok = end == content.len() || bytes[end] == b' ';
        if before_ok && after_ok {
            return true;
        }
        start = begin + 1;
        if start >= content.len() {
            break;
        }
    }
    false
}

impl Categorizer for KeywordCategorizer {
    fn categorize(&self, filename: &str, text: &str) -> CategoryMatch {
        let filename_normalized = normalize(filename);
        let content = format!("{filename_normalized} {}", normalize(text));

        let mut best: Option<(f64, &CategoryDef, Vec<String>)> = None;

        for def in CATEGORIES {
            let mut score = 0.0;
            let mut matched = Vec::new();
            for keyword in def.keywords {
                if !content.contains(keyword) {
                    continue;
                }
                let mut keyword_score = KEYWORD_SCORE;
                if word_boundary_match(&content, keyword) {
                    keyword_score += WORD_BOUNDARY_BONUS;
                }
                if filename_normalized.contains(keyword) {
                    keyword_score += FILENAME_BONUS;
                }
                score += keyword_score;
                matched.push(keyword.to_string());
            }
            if score <= 0.0 {
                continue;
            }
            let weighted = score / def.priority as f64;
            if best.as_ref().map(|(s, _, _)| weighted > *s).unwrap_or(true) {
                best = Some((weighted, def, matched));
            }
        }

        match best {
            Some((score, def, matched_terms)) => CategoryMatch {
                category: def.name.to_string(),
                confidence: (score / CONFIDENCE_CEILING).min(1.0),
                matched_terms,
            },
            None => CategoryMatch {
                category: FALLBACK_CATEGORY.to_string(),
                confidence: 0.0,
                matched_terms: Vec::new(),
            },
        }
    }
}
