//! IdP sessions, the Relying Parties linked to them, and the refresh token registry.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OAuth2Session::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2Session::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OAuth2Session::UserId).string().not_null())
                    .col(ColumnDef::new(OAuth2Session::CsrfToken).string().not_null())
                    .col(
                        ColumnDef::new(OAuth2Session::AuthTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Session::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Session::TerminatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OAuth2SessionClient::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2SessionClient::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OAuth2SessionClient::SessionId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2SessionClient::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2SessionClient::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_oauth2_session_client_session")
                            .from(OAuth2SessionClient::Table, OAuth2SessionClient::SessionId)
                            .to(OAuth2Session::Table, OAuth2Session::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OAuth2RefreshToken::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::Jti)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::UserId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OAuth2RefreshToken::Scope).text().not_null())
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::RevokedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_session_user_id")
                    .table(OAuth2Session::Table)
                    .col(OAuth2Session::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_refresh_token_user_client")
                    .table(OAuth2RefreshToken::Table)
                    .col(OAuth2RefreshToken::UserId)
                    .col(OAuth2RefreshToken::ClientId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_oauth2_refresh_token_user_client")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(Index::drop().name("idx_oauth2_session_user_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(OAuth2RefreshToken::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OAuth2SessionClient::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OAuth2Session::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum OAuth2Session {
    #[sea_orm(iden = "oauth2_session")]
    Table,
    Id,
    UserId,
    CsrfToken,
    AuthTime,
    ExpiresAt,
    TerminatedAt,
}

#[derive(DeriveIden)]
enum OAuth2SessionClient {
    #[sea_orm(iden = "oauth2_session_client")]
    Table,
    Id,
    SessionId,
    ClientId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum OAuth2RefreshToken {
    #[sea_orm(iden = "oauth2_refresh_token")]
    Table,
    Jti,
    ClientId,
    UserId,
    Scope,
    ExpiresAt,
    RevokedAt,
    CreatedAt,
}
