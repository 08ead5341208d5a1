/// Permission set handed to `deno_web`. The dynamic handler registers no
/// network or filesystem extensions, so the only capability left to gate is
/// high-resolution timers, which we deny: scripts can only reach the outside
/// world through the `ctx` object bound to the scraper's middleware chain.
#[derive(Clone, Debug, Default)]
pub struct Permissions;

impl deno_web::TimersPermission for Permissions {
    fn allow_hrtime(&mut self) -> bool {
        false
    }

    fn check_unstable(&self, _state: &deno_core::OpState, _api_name: &'static str) {}
}
