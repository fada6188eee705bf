use depot_acquire::run_method;
use depot_methods::rsh::RshMethod;

fn main() {
    depot_methods::init_logging();
    // invoked as `rsh` or `ssh`; the name selects program defaults
    let binary = std::env::args()
        .next()
        .map(|arg0| {
            std::path::Path::new(&arg0)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "rsh".to_string())
        })
        .unwrap_or_else(|| "rsh".to_string());
    let mut method = RshMethod::new(binary);
    std::process::exit(run_method(RshMethod::capabilities(), &mut method));
}
