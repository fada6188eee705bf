use depot_acquire::run_method;
use depot_methods::http::HttpMethod;

fn main() {
    depot_methods::init_logging();
    let mut method = HttpMethod::new();
    std::process::exit(run_method(HttpMethod::capabilities(), &mut method));
}
