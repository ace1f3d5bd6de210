/// Scope containment module
///
/// Models the GLOBAL → COMPANY → BUSINESS → OUTLET hierarchy and answers
/// whether a grant made at one scope applies to a request made at another.
///
/// # Examples
///
/// ```
/// use scopegate_authz::scope::{ScopeRef, ScopeResolver, StaticScopeDirectory};
///
/// let directory = StaticScopeDirectory::new().with_outlet("o1", "b1");
/// let resolver = ScopeResolver::new();
///
/// assert!(resolver.covers(&ScopeRef::global(), &ScopeRef::outlet("o1"), &directory));
/// assert!(resolver.covers(&ScopeRef::business("b1"), &ScopeRef::outlet("o1"), &directory));
/// ```

mod types;
mod directory;
mod resolver;


pub use types::{ScopeRef, ScopeType, ScopeError, ScopeResult};
pub use directory::{ScopeDirectory, StaticScopeDirectory};
pub use resolver::{ScopeResolver, CacheStats};
