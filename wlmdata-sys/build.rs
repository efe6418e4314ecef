use std::path::PathBuf;

// These helper functions are only used when the wlm-sdk feature is enabled
#[allow(dead_code)]
/// Print a boxed error message for visibility in cargo output
fn print_env_error(title: &str, details: &[&str], fixes: &[&str]) {
    eprintln!();
    eprintln!("╔══════════════════════════════════════════════════════════════════╗");
    eprintln!("║ WLMDATA BUILD ERROR: {:<44} ║", title);
    eprintln!("╠══════════════════════════════════════════════════════════════════╣");
    for detail in details {
        eprintln!("║ {:<66} ║", detail);
    }
    eprintln!("╠══════════════════════════════════════════════════════════════════╣");
    eprintln!("║ HOW TO FIX:                                                      ║");
    for fix in fixes {
        eprintln!("║   {:<64} ║", fix);
    }
    eprintln!("╚══════════════════════════════════════════════════════════════════╝");
    eprintln!();
}

#[allow(dead_code)]
/// Check common install locations of the wlmData library
fn find_wlmdata_lib() -> Option<PathBuf> {
    let candidates: &[(&str, &str)] = &[
        ("C:/Windows/System32", "wlmData.dll"),
        ("/usr/local/lib", "libwlmData.so"),
        ("/usr/lib", "libwlmData.so"),
        ("/usr/lib/x86_64-linux-gnu", "libwlmData.so"),
    ];

    for (dir, file) in candidates {
        let p = PathBuf::from(dir);
        if p.join(file).exists() {
            return Some(p);
        }
    }
    None
}

fn main() {
    // Only emit linking logic if the `wlm-sdk` feature is enabled.
    // The declarations in src/lib.rs compile without the library present.
    #[cfg(feature = "wlm-sdk")]
    {
        println!("cargo:rerun-if-env-changed=WLMDATA_LIB_DIR");
        println!("cargo:rerun-if-env-changed=LIBRARY_PATH");

        let lib_dir = match std::env::var("WLMDATA_LIB_DIR") {
            Ok(dir) => Some(PathBuf::from(dir)),
            Err(_) => {
                let found = find_wlmdata_lib();
                match &found {
                    Some(dir) => println!(
                        "cargo:warning=WLMDATA_LIB_DIR not set, auto-detected: {}",
                        dir.display()
                    ),
                    None => print_env_error(
                        "wlmData library not found",
                        &[
                            "The wlm-sdk feature links against wlmData.",
                            "No library was found in the standard locations.",
                        ],
                        &["export WLMDATA_LIB_DIR=/path/to/wlmData"],
                    ),
                }
                found
            }
        };

        if let Some(dir) = lib_dir {
            if !dir.exists() {
                println!(
                    "cargo:warning=wlmData library path does not exist: {}",
                    dir.display()
                );
                println!("cargo:warning=Linker will search LIBRARY_PATH and standard paths");
            }
            println!("cargo:rustc-link-search=native={}", dir.display());
        }

        println!("cargo:rustc-link-lib=dylib=wlmData");
    }
}
