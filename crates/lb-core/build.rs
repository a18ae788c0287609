use std::env;

fn main() {
	let out_dir = env::var("OUT_DIR").unwrap();
	let profile_name = out_dir
		.split(std::path::MAIN_SEPARATOR)
		.nth_back(3)
		.unwrap();
	println!(
		"cargo:rustc-env=PODLB_BUILD_RUSTC_VERSION={}",
		rustc_version::version().unwrap()
	);
	println!("cargo:rustc-env=PODLB_BUILD_PROFILE_NAME={profile_name}");
}
