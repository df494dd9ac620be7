use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{self, Ident, Index, Member};

/// Derive macro generating an impl of the trait `Traverse`.
///
/// Every field marked `#[traverse]` must implement `Trace`. `traverse` visits the marked fields
/// in declaration order and `clear` untraces them.
///
/// With `#[traverse(unless = method)]` on the struct both operations do nothing while
/// `self.method()` returns true.
#[proc_macro_derive(Traverse, attributes(traverse))]
pub fn traverse_derive(input: TokenStream) -> TokenStream {
    let ast = syn::parse(input).unwrap();

    impl_traverse_macro(&ast)
}

fn impl_traverse_macro(ast: &syn::DeriveInput) -> TokenStream {
    let name = &ast.ident;
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();

    let fields: Vec<Member> = match &ast.data {
        syn::Data::Struct(ds) => ds
            .fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.attrs.iter().any(is_traverse_marker))
            .map(|(i, field)| match &field.ident {
                Some(ident) => Member::Named(ident.clone()),
                None => Member::Unnamed(Index::from(i)),
            })
            .collect(),
        _ => panic!("Must be a data struct"),
    };

    let unless = parse_unless(ast);
    let (skip_traverse, skip_clear): (TokenStream2, TokenStream2) = match &unless {
        Some(method) => (
            quote! {
                if self.#method() {
                    return ::core::ops::ControlFlow::Continue(());
                }
            },
            quote! {
                if self.#method() {
                    return;
                }
            },
        ),
        None => (quote! {}, quote! {}),
    };

    let gen = quote! {
        impl #impl_generics ::handlebridge::gc::Traverse for #name #ty_generics #where_clause {
            fn traverse(
                &self,
                visit: &mut ::handlebridge::gc::Visit<'_>,
            ) -> ::core::ops::ControlFlow<()> {
                #skip_traverse
                #(
                    if ::handlebridge::gc::Trace::trace(&self.#fields, visit).is_break() {
                        return ::core::ops::ControlFlow::Break(());
                    }
                )*
                ::core::ops::ControlFlow::Continue(())
            }

            fn clear(&self) {
                #skip_clear
                #(
                    ::handlebridge::gc::Trace::untrace(&self.#fields);
                )*
            }
        }
    };
    gen.into()
}

fn is_traverse_marker(attr: &syn::Attribute) -> bool {
    attr.path().is_ident("traverse") && matches!(attr.meta, syn::Meta::Path(_))
}

fn parse_unless(ast: &syn::DeriveInput) -> Option<Ident> {
    let mut unless = None;
    for attr in ast.attrs.iter().filter(|a| a.path().is_ident("traverse")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("unless") {
                unless = Some(meta.value()?.parse::<Ident>()?);
                Ok(())
            } else {
                Err(meta.error("expected `unless = method`"))
            }
        })
        .unwrap();
    }
    unless
}
