use uuid::Uuid;

/// Generates an opaque identifier. Used for workflow ids when the caller does
/// not supply one and for node ids when the config leaves them unset.
pub fn generate() -> String {
	Uuid::new_v4().to_string()
}

pub fn generate_with_prefix(prefix: &str) -> String {
	format!("{prefix}-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn generated_ids_are_unique() {
		let a = generate();
		let b = generate();
		assert_ne!(a, b);
	}

	#[test]
	fn prefixed_ids_carry_prefix() {
		let id = generate_with_prefix("node");
		assert!(id.starts_with("node-"));
	}
}
