/// Declares a struct of typed remote methods and a `bind` constructor.
///
/// Each field is written `name: fn(Arg) -> Ret = <Operation>` or
/// `name: fn() -> Ret = <Operation>`; at most one argument is allowed. The
/// operation expression is evaluated inside `bind`, so `?` may be used in it.
///
/// ```ignore
/// rpc_client! {
///     pub struct Node {
///         height: fn() -> u64 = Operation::new("GetBlockCount").cache("ttl:5s"),
///         block: fn(u64) -> serde_json::Value = Operation::new("GetBlock"),
///         echo: fn(String) -> String = Operation::from_tags("Echo", r#"rpc:"rest" method:"POST""#)?,
///     }
/// }
/// ```
#[macro_export]
macro_rules! rpc_client {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident : fn($($arg:ty)?) -> $ret:ty = $op:expr
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $crate::RemoteFn<($($arg,)?), $ret>,
            )*
        }

        impl $name {
            /// Binds every declared method to `client`.
            pub fn bind(
                client: &$crate::Client,
            ) -> ::std::result::Result<Self, $crate::BindError> {
                Ok(Self {
                    $( $field: client.bind($op)?, )*
                })
            }
        }
    };
}
