//! Derive macro for the `SharedFromThis` trait.

use proc_macro2::{Span, TokenStream};
use quote::{quote, quote_spanned, ToTokens};
use syn::{
    parse_macro_input, parse_quote, spanned::Spanned, Data, DeriveInput, Field, Fields, Index,
    Member, Path, Type,
};

/// Implements `SharedFromThis` by pointing `weak_self` at the struct's
/// `WeakSelf` field.
///
/// The field is the one marked `#[weak_self]`, or else the only field whose
/// type is named `WeakSelf`. Use `#[rudo_rc(crate = path)]` when the crate
/// is re-exported under another name.
#[proc_macro_derive(SharedFromThis, attributes(rudo_rc, weak_self))]
pub fn derive_shared_from_this(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let mut rudo_rc: Path = parse_quote!(::rudo_rc);

    for attr in &input.attrs {
        if !attr.path().is_ident("rudo_rc") {
            continue;
        }

        let result = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate") {
                rudo_rc = meta.value()?.parse()?;
                Ok(())
            } else {
                Err(meta.error("unsupported attribute"))
            }
        });

        if let Err(err) = result {
            return err.into_compile_error().into();
        }
    }

    let fields = match &input.data {
        Data::Struct(data) => &data.fields,
        Data::Enum(data) => {
            return quote_spanned! {
                data.enum_token.span => compile_error!("`SharedFromThis` can only be derived for structs");
            }
            .into();
        }
        Data::Union(data) => {
            return quote_spanned! {
                data.union_token.span => compile_error!("`SharedFromThis` can only be derived for structs");
            }
            .into();
        }
    };

    let member = match find_weak_self(fields) {
        Ok(member) => member,
        Err(err) => return err.into_compile_error().into(),
    };

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let generated = quote! {
        impl #impl_generics #rudo_rc::SharedFromThis for #name #ty_generics #where_clause {
            #[inline]
            fn weak_self(&self) -> &#rudo_rc::WeakSelf<Self> {
                &self.#member
            }
        }
    };

    generated.into()
}

fn find_weak_self(fields: &Fields) -> syn::Result<TokenStream> {
    let members: Vec<(Member, &Field)> = fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let member = field
                .ident
                .clone()
                .map_or_else(|| Member::Unnamed(Index::from(i)), Member::Named);
            (member, field)
        })
        .collect();

    let marked: Vec<_> = members
        .iter()
        .filter(|(_, field)| field.attrs.iter().any(|a| a.path().is_ident("weak_self")))
        .collect();

    match marked.as_slice() {
        [(member, _)] => return Ok(member.to_token_stream()),
        [_, (_, second), ..] => {
            return Err(syn::Error::new(
                second.span(),
                "only one field can be marked `#[weak_self]`",
            ))
        }
        [] => {}
    }

    let typed: Vec<_> = members
        .iter()
        .filter(|(_, field)| is_weak_self(&field.ty))
        .collect();

    match typed.as_slice() {
        [(member, _)] => Ok(member.to_token_stream()),
        [] => Err(syn::Error::new(
            Span::call_site(),
            "`SharedFromThis` requires a `WeakSelf<Self>` field",
        )),
        [_, (_, second), ..] => Err(syn::Error::new(
            second.span(),
            "multiple `WeakSelf` fields; mark one with `#[weak_self]`",
        )),
    }
}

fn is_weak_self(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .is_some_and(|s| s.ident == "WeakSelf"),
        _ => false,
    }
}
