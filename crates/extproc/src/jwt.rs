//! Single-key JWT verification. The auth service issues tokens signed with
//! one configured key (by default HS256 over `TOKEN_PUBLIC_KEY`); unlike a
//! JWKS-backed verifier there is no key rotation or `kid` lookup to do.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::error::ProcessorError;

pub struct Verifier {
	decoding_key: DecodingKey,
	validation: Validation,
}

impl Verifier {
	pub fn new(
		public_key: &SecretString,
		algorithm: &str,
		issuer: &str,
		audience: &str,
	) -> anyhow::Result<Self> {
		let alg = parse_algorithm(algorithm)?;
		let decoding_key = match alg {
			Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
				DecodingKey::from_secret(public_key.expose_secret().as_bytes())
			},
			Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 | Algorithm::PS256 | Algorithm::PS384 | Algorithm::PS512 => {
				DecodingKey::from_rsa_pem(public_key.expose_secret().as_bytes())?
			},
			Algorithm::ES256 | Algorithm::ES384 => {
				DecodingKey::from_ec_pem(public_key.expose_secret().as_bytes())?
			},
			#[allow(unreachable_patterns)]
			other => anyhow::bail!("unsupported token algorithm {other:?}"),
		};

		let mut validation = Validation::new(alg);
		validation.set_issuer(&[issuer]);
		validation.set_audience(&[audience]);

		Ok(Self {
			decoding_key,
			validation,
		})
	}

	/// Verifies signature, issuer, audience and expiry, returning the raw
	/// claims object on success.
	pub fn verify(&self, token: &str) -> Result<Value, ProcessorError> {
		decode::<Value>(token, &self.decoding_key, &self.validation)
			.map(|data| data.claims)
			.map_err(|err| ProcessorError::InvalidToken(err.to_string()))
	}
}

fn parse_algorithm(s: &str) -> anyhow::Result<Algorithm> {
	Ok(match s {
		"HS256" => Algorithm::HS256,
		"HS384" => Algorithm::HS384,
		"HS512" => Algorithm::HS512,
		"RS256" => Algorithm::RS256,
		"RS384" => Algorithm::RS384,
		"RS512" => Algorithm::RS512,
		"ES256" => Algorithm::ES256,
		"ES384" => Algorithm::ES384,
		"PS256" => Algorithm::PS256,
		"PS384" => Algorithm::PS384,
		"PS512" => Algorithm::PS512,
		other => anyhow::bail!("unsupported token algorithm {other}"),
	})
}

#[cfg(test)]
mod tests {
	use jsonwebtoken::{EncodingKey, Header, encode};
	use serde_json::json;

	use super::*;

	#[test]
	fn round_trips_an_hs256_token() {
		let secret = SecretString::from("shh".to_string());
		let verifier = Verifier::new(&secret, "HS256", "auth", "auth").unwrap();

		let claims = json!({
			"iss": "auth",
			"aud": "auth",
			"exp": 4_000_000_000i64,
			"identity": {"tenant": "acme", "user_id": "u1", "key_id": "k1"},
		});
		let token = encode(
			&Header::new(Algorithm::HS256),
			&claims,
			&EncodingKey::from_secret(b"shh"),
		)
		.unwrap();

		let decoded = verifier.verify(&token).unwrap();
		assert_eq!(decoded["identity"]["tenant"], "acme");
	}

	#[test]
	fn rejects_wrong_issuer() {
		let secret = SecretString::from("shh".to_string());
		let verifier = Verifier::new(&secret, "HS256", "auth", "auth").unwrap();
		let claims = json!({"iss": "someone-else", "aud": "auth", "exp": 4_000_000_000i64});
		let token = encode(
			&Header::new(Algorithm::HS256),
			&claims,
			&EncodingKey::from_secret(b"shh"),
		)
		.unwrap();
		assert!(verifier.verify(&token).is_err());
	}
}
