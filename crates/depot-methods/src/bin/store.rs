use depot_acquire::run_method;
use depot_methods::store::StoreMethod;

fn main() {
    depot_methods::init_logging();
    // a codec-named symlink (gzip, xz, zstd, …) forwards the choice
    let binary = std::env::args()
        .next()
        .map(|arg0| {
            std::path::Path::new(&arg0)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "store".to_string())
        })
        .unwrap_or_else(|| "store".to_string());
    let mut method = StoreMethod::new(binary);
    std::process::exit(run_method(StoreMethod::capabilities(), &mut method));
}
