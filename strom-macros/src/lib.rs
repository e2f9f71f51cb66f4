use proc_macro::TokenStream;
use quote::ToTokens;
use syn::parse_macro_input;
use syn::ItemFn;

/// Runs an `async fn` test to completion on the calling thread.
///
/// ```ignore
/// #[strom::test]
/// async fn reads_back() {
///   // ...
/// }
/// ```
#[proc_macro_attribute]
pub fn test(_: TokenStream, function: TokenStream) -> TokenStream {
  let testing = parse_macro_input!(function as ItemFn);

  TestFn { function: testing, krate: Krate::External }
    .into_token_stream()
    .into()
}

#[proc_macro_attribute]
pub fn internal_test(_: TokenStream, function: TokenStream) -> TokenStream {
  let testing = parse_macro_input!(function as ItemFn);

  TestFn { function: testing, krate: Krate::Internal }
    .into_token_stream()
    .into()
}

enum Krate {
  // Used from integration tests and downstream crates.
  External,
  // Used from inside strom itself, where the crate is `crate`.
  Internal,
}

struct TestFn {
  function: ItemFn,
  krate: Krate,
}

impl ToTokens for TestFn {
  fn to_tokens(&self, tokens: &mut proc_macro2::TokenStream) {
    let ItemFn { attrs, vis, sig, block } = &self.function;

    let krate = match self.krate {
      Krate::External => quote::quote!(::strom),
      Krate::Internal => quote::quote!(crate),
    };

    let mut sig = sig.clone();
    let body = if sig.asyncness.take().is_some() {
      quote::quote! { #krate::future::block_on(async move #block) }
    } else {
      quote::quote! { #block }
    };

    tokens.extend(quote::quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            #body
        }
    });
  }
}
