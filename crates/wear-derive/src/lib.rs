//! Derive macro mapping a struct onto a table.
//!
//! This crate provides `#[derive(Record)]`, which implements
//! `wear_orm::Record` for structs with named fields.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse_macro_input, Attribute, Data, DeriveInput, Expr, Fields, GenericArgument, Ident, Lit,
    Meta, PathArguments, Type,
};

/// Derives `wear_orm::Record` for a struct.
///
/// # Attributes
///
/// - `#[table(name = "table_name")]` - Specifies the SQL table name (optional,
///   defaults to the snake_case struct name)
///
/// # Field Attributes
///
/// - `#[column(name = "column_name")]` - Specifies the SQL column name
///   (optional, defaults to the snake_case field name). `"expr as alias"`
///   selects an expression.
/// - `#[column(primary_key)]` - Marks the field as primary key. Without it a
///   field whose column is `id` is the key.
/// - `#[column(nullable)]` - Marks the column as nullable (`Option<T>` fields
///   are nullable anyway)
/// - `#[column(skip)]` - Ignores the field
/// - `#[column(join)]` - Relation field filled by joins: `Vec<T>` collects
///   many related records, `T` or `Option<T>` holds one
/// - `#[column(many_to_many)]` - Marker field of a pure link record: the field
///   carries no column and joins of this type contribute no columns
///
/// The struct must implement `Default`.
#[proc_macro_derive(Record, attributes(table, column))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    derive_record_impl(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

fn derive_record_impl(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let struct_name_str = struct_name.to_string();
    let table_name = get_table_name(&input.attrs)?;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Record derive does not support generic structs",
        ));
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Record derive only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "Record derive only supports structs",
            ));
        }
    };

    let mut columns: Vec<ColumnInfo> = Vec::new();
    let mut joins: Vec<JoinInfo> = Vec::new();
    let mut link_only = false;

    for (pos, field) in fields.iter().enumerate() {
        let Some(field_name) = field.ident.clone() else {
            return Err(syn::Error::new_spanned(field, "expected a named field"));
        };
        let attrs = parse_column_attrs(&field.attrs)?;

        if attrs.skip {
            continue;
        }
        if attrs.many_to_many {
            link_only = true;
            continue;
        }
        if attrs.join {
            joins.push(JoinInfo::new(field_name, pos, &field.ty)?);
            continue;
        }
        columns.push(ColumnInfo {
            field_name,
            field_type: field.ty.clone(),
            pos,
            column_name: attrs.name,
            is_primary_key: attrs.primary_key,
            is_nullable: attrs.nullable,
        });
    }

    let table_override = table_name.map(|name| quote! { .table(#name) });
    let link_only_marker = link_only.then(|| quote! { .link_only() });

    let field_defs = columns.iter().map(|c| {
        let name = c.field_name.to_string();
        let ty = &c.field_type;
        let pos = c.pos;
        let column = c.column_name.as_ref().map(|n| quote! { .column(#n) });
        let pk = c.is_primary_key.then(|| quote! { .primary_key() });
        let nullable = c.is_nullable.then(|| quote! { .nullable() });
        quote! {
            .field(::wear_orm::FieldDef::new::<#ty>(#name, #pos) #column #pk #nullable)
        }
    });

    let join_defs = joins.iter().map(|j| {
        let name = j.field_name.to_string();
        let ty = &j.related;
        let pos = j.pos;
        let kind = match j.kind {
            Relation::Many => quote! { ::wear_orm::JoinKind::Many },
            Relation::Optional | Relation::Plain => quote! { ::wear_orm::JoinKind::One },
        };
        quote! {
            .join(::wear_orm::JoinDef::new::<#ty>(#name, #pos, #kind))
        }
    });

    let value_arms = columns.iter().map(|c| {
        let ident = &c.field_name;
        let pos = c.pos;
        quote! {
            #pos => ::wear_orm::ToValue::to_value(&self.#ident),
        }
    });

    let set_arms = columns.iter().map(|c| {
        let ident = &c.field_name;
        let ty = &c.field_type;
        let pos = c.pos;
        quote! {
            #pos => self.#ident = <#ty as ::wear_orm::FieldType>::from_value(value)?,
        }
    });

    let attach_arms = joins.iter().map(|j| {
        let ident = &j.field_name;
        let ty = &j.related;
        let pos = j.pos;
        let related = quote! { related.take::<#ty>()? };
        match j.kind {
            Relation::Many => quote! { #pos => self.#ident.push(#related), },
            Relation::Optional => quote! {
                #pos => self.#ident = ::core::option::Option::Some(#related),
            },
            Relation::Plain => quote! { #pos => self.#ident = #related, },
        }
    });

    let expanded = quote! {
        impl ::wear_orm::Record for #struct_name {
            fn describe() -> ::wear_orm::ModelDef {
                ::wear_orm::ModelDef::new(#struct_name_str)
                    #table_override
                    #(#field_defs)*
                    #(#join_defs)*
                    #link_only_marker
            }

            fn column_value(&self, pos: usize) -> ::wear_orm::Value {
                match pos {
                    #(#value_arms)*
                    _ => ::wear_orm::Value::Null,
                }
            }

            #[allow(unused_variables)]
            fn set_column(
                &mut self,
                pos: usize,
                value: ::wear_orm::Value,
            ) -> ::wear_orm::Result<()> {
                match pos {
                    #(#set_arms)*
                    _ => {}
                }
                ::core::result::Result::Ok(())
            }

            #[allow(unused_variables)]
            fn attach(
                &mut self,
                pos: usize,
                related: ::wear_orm::Related,
            ) -> ::wear_orm::Result<()> {
                match pos {
                    #(#attach_arms)*
                    _ => {}
                }
                ::core::result::Result::Ok(())
            }
        }
    };

    Ok(expanded)
}

struct ColumnInfo {
    field_name: Ident,
    field_type: Type,
    pos: usize,
    column_name: Option<String>,
    is_primary_key: bool,
    is_nullable: bool,
}

enum Relation {
    Many,
    Optional,
    Plain,
}

struct JoinInfo {
    field_name: Ident,
    pos: usize,
    kind: Relation,
    related: Type,
}

impl JoinInfo {
    fn new(field_name: Ident, pos: usize, ty: &Type) -> syn::Result<Self> {
        let (kind, related) = match wrapped_type(ty, "Vec") {
            Some(inner) => (Relation::Many, inner),
            None => match wrapped_type(ty, "Option") {
                Some(inner) => (Relation::Optional, inner),
                None => (Relation::Plain, ty.clone()),
            },
        };
        if !matches!(related, Type::Path(_)) {
            return Err(syn::Error::new_spanned(
                ty,
                "join fields must hold a record type, Vec<Record> or Option<Record>",
            ));
        }
        Ok(Self {
            field_name,
            pos,
            kind,
            related,
        })
    }
}

/// Returns `T` when `ty` is `wrapper<T>`.
fn wrapped_type(ty: &Type, wrapper: &str) -> Option<Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        GenericArgument::Type(inner) => Some(inner.clone()),
        _ => None,
    }
}

#[derive(Default)]
struct ColumnAttrs {
    name: Option<String>,
    primary_key: bool,
    nullable: bool,
    skip: bool,
    join: bool,
    many_to_many: bool,
}

fn string_value(meta: &syn::meta::ParseNestedMeta<'_>) -> syn::Result<String> {
    let value: Expr = meta.value()?.parse()?;
    if let Expr::Lit(lit) = &value {
        if let Lit::Str(s) = &lit.lit {
            return Ok(s.value());
        }
    }
    Err(syn::Error::new_spanned(value, "expected a string literal"))
}

fn get_table_name(attrs: &[Attribute]) -> syn::Result<Option<String>> {
    let mut table_name = None;
    for attr in attrs {
        if attr.path().is_ident("table") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    table_name = Some(string_value(&meta)?);
                    Ok(())
                } else {
                    Err(meta.error("unsupported table attribute"))
                }
            })?;
        }
    }
    Ok(table_name)
}

fn parse_column_attrs(attrs: &[Attribute]) -> syn::Result<ColumnAttrs> {
    let mut result = ColumnAttrs::default();

    for attr in attrs {
        if attr.path().is_ident("column") {
            // Handle empty attribute like #[column]
            if matches!(attr.meta, Meta::Path(_)) {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("primary_key") {
                    result.primary_key = true;
                } else if meta.path.is_ident("nullable") {
                    result.nullable = true;
                } else if meta.path.is_ident("skip") {
                    result.skip = true;
                } else if meta.path.is_ident("join") {
                    result.join = true;
                } else if meta.path.is_ident("many_to_many") {
                    result.many_to_many = true;
                } else if meta.path.is_ident("name") {
                    result.name = Some(string_value(&meta)?);
                } else {
                    return Err(meta.error("unsupported column attribute"));
                }
                Ok(())
            })?;
        }
    }

    Ok(result)
}
