use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::providers::address::postal_digits;
use crate::providers::{PostalAddress, PostalLookup, ProviderError};

/// Body of `GET /<code>/json/`. Unknown codes come back as `{"erro": true}`.
#[derive(Debug, Default, Deserialize)]
pub struct ViaCepResponse {
    #[serde(default)]
    pub cep: String,
    #[serde(default)]
    pub logradouro: String,
    #[serde(default)]
    pub bairro: String,
    #[serde(default)]
    pub localidade: String,
    #[serde(default)]
    pub uf: String,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub erro: bool,
}

pub struct ViaCepClient {
    base_url: String,
    client: reqwest::Client,
}

impl ViaCepClient {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { base_url, client }
    }
}

#[async_trait]
impl PostalLookup for ViaCepClient {
    async fn lookup(&self, postal_code: &str) -> Result<PostalAddress, ProviderError> {
        let digits = postal_digits(postal_code)
            .ok_or_else(|| ProviderError::NotFound(format!("postal code '{postal_code}'")))?;

        let url = format!("{}/{}/json/", self.base_url.trim_end_matches('/'), digits);
        debug!(url = %url, "ViaCEP: looking up postal code");

        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status.as_u16() == 400 {
            return Err(ProviderError::NotFound(format!("postal code '{postal_code}'")));
        }
        if !status.is_success() {
            return Err(ProviderError::Transient(format!(
                "postal lookup answered HTTP {}",
                status.as_u16()
            )));
        }

        let body: ViaCepResponse = response.json().await?;
        postal_address(body, &digits)
    }
}

fn postal_address(body: ViaCepResponse, digits: &str) -> Result<PostalAddress, ProviderError> {
    if body.erro {
        return Err(ProviderError::NotFound(format!("postal code '{digits}'")));
    }

    let postal_code = if body.cep.is_empty() {
        match digits.split_at_checked(5) {
            Some((prefix, suffix)) if !suffix.is_empty() => format!("{prefix}-{suffix}"),
            _ => digits.to_string(),
        }
    } else {
        body.cep
    };

    Ok(PostalAddress {
        postal_code,
        street: body.logradouro,
        district: body.bairro,
        city: body.localidade,
        state: body.uf,
    })
}

// The service has answered both `true` and `"true"` over time.
fn lenient_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(flag) => flag,
        serde_json::Value::String(text) => text.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::{postal_address, ViaCepClient, ViaCepResponse};
    use crate::providers::{PostalLookup, ProviderError};

    #[test]
    fn maps_known_code() {
        let body: ViaCepResponse = serde_json::from_str(
            r#"{"cep":"01310-100","logradouro":"Avenida Paulista","bairro":"Bela Vista",
                "localidade":"São Paulo","uf":"SP"}"#,
        )
        .unwrap();

        let address = postal_address(body, "01310100").unwrap();
        assert_eq!(address.street, "Avenida Paulista");
        assert_eq!(address.district, "Bela Vista");
        assert_eq!(address.postal_code, "01310-100");
    }

    #[test]
    fn error_flag_is_not_found() {
        for json in [r#"{"erro":true}"#, r#"{"erro":"true"}"#] {
            let body: ViaCepResponse = serde_json::from_str(json).unwrap();
            assert!(matches!(
                postal_address(body, "99999999"),
                Err(ProviderError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn malformed_code_is_rejected_locally() {
        let client = ViaCepClient::new(reqwest::Client::new(), "http://127.0.0.1:1".to_string());
        let result = client.lookup("123").await;
        assert!(matches!(result, Err(ProviderError::NotFound(_))));
    }

    #[test]
    fn blank_cep_in_reply_keeps_short_digits_as_given() {
        let address = postal_address(ViaCepResponse::default(), "0131").unwrap();
        assert_eq!(address.postal_code, "0131");

        let address = postal_address(ViaCepResponse::default(), "01310100").unwrap();
        assert_eq!(address.postal_code, "01310-100");
    }
}
