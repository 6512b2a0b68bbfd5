use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::AppError;
use crate::models::order::NewOrder;
use crate::providers::address::{extract_postal_code, fold};

static LABELED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\s*_]*([A-Za-zÀ-ÿ ]{2,24}?)[\s*_]*:[\s*_]*(.*?)[\s*_]*$")
        .expect("valid labeled line regex")
});

static BULLET_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-•*]|\d+[.)])\s+(.+?)\s*$").expect("valid bullet line regex")
});

static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(?\b\d{2}\)?\s?9?\d{4}[-\s]?\d{4}\b").expect("valid phone regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Phone,
    Address,
    PostalCode,
    Items,
    Notes,
}

fn classify(label: &str) -> Option<Field> {
    match fold(label).trim() {
        "nome" | "cliente" | "nome do cliente" => Some(Field::Name),
        "telefone" | "tel" | "fone" | "celular" | "whatsapp" | "contato" => Some(Field::Phone),
        "endereco" | "end" | "endereco de entrega" | "entrega" => Some(Field::Address),
        "cep" => Some(Field::PostalCode),
        "pedido" | "itens" | "produtos" => Some(Field::Items),
        "observacao" | "observacoes" | "obs" => Some(Field::Notes),
        _ => None,
    }
}

/// Draft order fields recovered from a pasted chat message.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedOrderMessage {
    pub customer_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub items: Vec<String>,
    pub notes: Option<String>,
}

impl ParsedOrderMessage {
    pub fn into_new_order(self) -> Result<NewOrder, AppError> {
        let customer_name = self
            .customer_name
            .ok_or_else(|| AppError::BadRequest("message has no customer name".to_string()))?;
        let address = self
            .address
            .ok_or_else(|| AppError::BadRequest("message has no address".to_string()))?;

        Ok(NewOrder {
            customer_name,
            phone: self.phone,
            address,
            postal_code: self.postal_code,
            items: self.items,
            notes: self.notes,
        })
    }
}

/// Extracts labelled fields (`Nome:`, `Endereço:`, `CEP:`, ...) from an order
/// message. Lines after an items label are items until the next labelled line.
pub fn parse_order_message(text: &str) -> ParsedOrderMessage {
    let mut parsed = ParsedOrderMessage::default();
    let mut section: Option<Field> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if section == Some(Field::Items) {
            if let Some(caps) = BULLET_LINE.captures(line) {
                parsed.items.push(caps[1].to_string());
                continue;
            }
        }

        let labeled = LABELED_LINE
            .captures(line)
            .map(|caps| classify(&caps[1]).map(|field| (field, caps[2].trim().to_string())));

        match labeled {
            Some(Some((field, value))) => {
                section = Some(field);
                apply(&mut parsed, field, value);
            }
            // Unknown label, e.g. "Total: R$ 50".
            Some(None) => section = None,
            None if section == Some(Field::Items) => {
                let item = line.trim().trim_matches(['*', '_']).trim();
                if !item.is_empty() {
                    parsed.items.push(item.to_string());
                }
            }
            None if section == Some(Field::Notes) => {
                let extra = line.trim();
                parsed.notes = Some(match parsed.notes.take() {
                    Some(notes) => format!("{notes} {extra}"),
                    None => extra.to_string(),
                });
            }
            None => section = None,
        }
    }

    if parsed.postal_code.is_none() {
        parsed.postal_code = extract_postal_code(text);
    }
    if parsed.phone.is_none() {
        parsed.phone = PHONE.find(text).map(|found| found.as_str().trim().to_string());
    }

    parsed
}

fn apply(parsed: &mut ParsedOrderMessage, field: Field, value: String) {
    let value = (!value.is_empty()).then_some(value);

    match field {
        Field::Name => parsed.customer_name = value.or(parsed.customer_name.take()),
        Field::Phone => parsed.phone = value.or(parsed.phone.take()),
        Field::Address => parsed.address = value.or(parsed.address.take()),
        Field::PostalCode => {
            parsed.postal_code = value
                .as_deref()
                .and_then(extract_postal_code)
                .or(parsed.postal_code.take());
        }
        Field::Items => {
            if let Some(value) = value {
                parsed.items.extend(
                    value
                        .split([',', ';'])
                        .map(str::trim)
                        .filter(|item| !item.is_empty())
                        .map(str::to_string),
                );
            }
        }
        Field::Notes => parsed.notes = value.or(parsed.notes.take()),
    }
}
