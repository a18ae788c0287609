use arcstr::ArcStr;

/// Strng is a cheaply clonable, immutable string. Identities and display
/// names are passed around on every request, so sharing beats copying.
pub type Strng = ArcStr;

pub use arcstr::format;
pub use arcstr::literal;

pub const EMPTY: Strng = literal!("");

pub fn new<A: AsRef<str>>(a: A) -> Strng {
	ArcStr::from(a.as_ref())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn shares_storage_on_clone() {
		let a = new("10.0.0.1");
		let b = a.clone();
		assert_eq!(a, b);
		assert_eq!(a.as_ptr(), b.as_ptr());
	}
}
