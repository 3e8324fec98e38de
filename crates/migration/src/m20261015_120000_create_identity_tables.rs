//! Clients, users, authorization codes and consents.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 1. Registered Relying Parties
        manager
            .create_table(
                Table::create()
                    .table(OAuth2Client::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2Client::ClientId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OAuth2Client::SecretHash).string().null())
                    .col(ColumnDef::new(OAuth2Client::Name).string().not_null())
                    .col(ColumnDef::new(OAuth2Client::RedirectUris).text().not_null())
                    .col(
                        ColumnDef::new(OAuth2Client::PostLogoutRedirectUris)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::Scopes)
                            .text()
                            .not_null()
                            .default("openid profile"),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::GrantTypes)
                            .text()
                            .not_null()
                            .default("authorization_code"),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::ResponseTypes)
                            .text()
                            .not_null()
                            .default("code"),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::AccessTokenLifetime)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::RefreshTokenLifetime)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::IdTokenLifetime)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::RequirePkce)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::RequireConsent)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::Trusted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::IsConfidential)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 2. End users
        manager
            .create_table(
                Table::create()
                    .table(OAuth2User::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2User::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OAuth2User::Email)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(OAuth2User::EmailVerified)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(OAuth2User::PasswordHash).string().null())
                    .col(ColumnDef::new(OAuth2User::Name).string().null())
                    .col(ColumnDef::new(OAuth2User::GivenName).string().null())
                    .col(ColumnDef::new(OAuth2User::FamilyName).string().null())
                    .col(ColumnDef::new(OAuth2User::Picture).string().null())
                    .col(ColumnDef::new(OAuth2User::PhoneNumber).string().null())
                    .col(
                        ColumnDef::new(OAuth2User::PhoneNumberVerified)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(OAuth2User::SchoolId).string().null())
                    .col(ColumnDef::new(OAuth2User::Role).string().null())
                    .col(
                        ColumnDef::new(OAuth2User::Permissions)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(OAuth2User::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2User::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2User::LastLoginAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 3. Authorization codes (single use, short-lived)
        manager
            .create_table(
                Table::create()
                    .table(OAuth2Authorization::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2Authorization::Code)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Authorization::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Authorization::UserId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Authorization::RedirectUri)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OAuth2Authorization::Scope).text().not_null())
                    .col(ColumnDef::new(OAuth2Authorization::Nonce).string().null())
                    .col(
                        ColumnDef::new(OAuth2Authorization::CodeChallenge)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Authorization::CodeChallengeMethod)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Authorization::AuthTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Authorization::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Authorization::UsedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Authorization::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 4. Consents
        manager
            .create_table(
                Table::create()
                    .table(OAuth2Consent::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2Consent::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OAuth2Consent::UserId).string().not_null())
                    .col(ColumnDef::new(OAuth2Consent::ClientId).string().not_null())
                    .col(ColumnDef::new(OAuth2Consent::Scope).text().not_null())
                    .col(
                        ColumnDef::new(OAuth2Consent::GrantedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Consent::RevokedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_authorization_client_id")
                    .table(OAuth2Authorization::Table)
                    .col(OAuth2Authorization::ClientId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_authorization_expires_at")
                    .table(OAuth2Authorization::Table)
                    .col(OAuth2Authorization::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_consent_user_client")
                    .table(OAuth2Consent::Table)
                    .col(OAuth2Consent::UserId)
                    .col(OAuth2Consent::ClientId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_oauth2_consent_user_client")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_oauth2_authorization_expires_at")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_oauth2_authorization_client_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(OAuth2Consent::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OAuth2Authorization::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OAuth2User::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OAuth2Client::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum OAuth2Client {
    #[sea_orm(iden = "oauth2_client")]
    Table,
    ClientId,
    SecretHash,
    Name,
    RedirectUris,
    PostLogoutRedirectUris,
    Scopes,
    GrantTypes,
    ResponseTypes,
    AccessTokenLifetime,
    RefreshTokenLifetime,
    IdTokenLifetime,
    RequirePkce,
    RequireConsent,
    Trusted,
    IsConfidential,
    IsActive,
    DeletedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum OAuth2User {
    #[sea_orm(iden = "oauth2_user")]
    Table,
    Id,
    Email,
    EmailVerified,
    PasswordHash,
    Name,
    GivenName,
    FamilyName,
    Picture,
    PhoneNumber,
    PhoneNumberVerified,
    SchoolId,
    Role,
    Permissions,
    CreatedAt,
    UpdatedAt,
    LastLoginAt,
}

#[derive(DeriveIden)]
enum OAuth2Authorization {
    #[sea_orm(iden = "oauth2_authorization")]
    Table,
    Code,
    ClientId,
    UserId,
    RedirectUri,
    Scope,
    Nonce,
    CodeChallenge,
    CodeChallengeMethod,
    AuthTime,
    ExpiresAt,
    UsedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum OAuth2Consent {
    #[sea_orm(iden = "oauth2_consent")]
    Table,
    Id,
    UserId,
    ClientId,
    Scope,
    GrantedAt,
    RevokedAt,
}
