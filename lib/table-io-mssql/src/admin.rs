//! Database provisioning: databases, schemas, logins, users and the helper
//! procedures used to tear schemas down again.
//!
//! The `*_script` functions only build T-SQL; [`DbAdmin`] runs them through
//! [`run_script`]. Every name is checked with [`validate_identifier`] before
//! it lands in a script.

use serde_json::Value as JsonValue;
use table_io::{SqlExecutor, StorageError, validate_identifier};
use tracing::info;

use crate::script::{output_rows, run_script};

/// Schema holding the helper procedures.
pub const MAIN_SCHEMA: &str = "main";
pub const DROP_CONSTRAINTS_PROC: &str = "DropConstraints";
pub const DROP_OBJECTS_PROC: &str = "DropObjects";
pub const DROP_SCHEMA_PROC: &str = "DropSchema";

const PROCEDURES: [&str; 3] = [DROP_CONSTRAINTS_PROC, DROP_OBJECTS_PROC, DROP_SCHEMA_PROC];

fn check(names: &[&str]) -> Result<(), StorageError> {
    names.iter().try_for_each(|name| validate_identifier(name))
}

/// Quote a string literal.
fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn create_database_script(database: &str) -> Result<String, StorageError> {
    check(&[database])?;
    Ok(format!(
        "USE master;
GO
IF NOT EXISTS (SELECT name FROM sys.databases WHERE name = N'{database}')
BEGIN
  CREATE DATABASE [{database}];
  SELECT 'Database {database} created' AS Status;
END
ELSE
BEGIN
  SELECT 'Database {database} already exists' AS Status;
END"
    ))
}

pub fn use_database_script(database: &str) -> Result<String, StorageError> {
    check(&[database])?;
    Ok(format!(
        "USE [{database}];
SELECT 'Using database {database}' AS Status;"
    ))
}

pub fn drop_database_script(database: &str) -> Result<String, StorageError> {
    check(&[database])?;
    Ok(format!(
        "USE master;
GO
IF EXISTS (SELECT name FROM sys.databases WHERE name = N'{database}')
BEGIN
  ALTER DATABASE [{database}] SET SINGLE_USER WITH ROLLBACK IMMEDIATE;
  DROP DATABASE [{database}];
  SELECT 'Database {database} dropped' AS Status;
END
ELSE
BEGIN
  SELECT 'Database {database} does not exist' AS Status;
END"
    ))
}

pub fn create_schema_script(schema: &str) -> Result<String, StorageError> {
    check(&[schema])?;
    Ok(format!(
        "IF NOT EXISTS (SELECT * FROM sys.schemas WHERE name = N'{schema}')
BEGIN
  EXEC('CREATE SCHEMA [{schema}];');
  SELECT 'Schema {schema} created' AS Status;
END
ELSE
BEGIN
  SELECT 'Schema {schema} already exists' AS Status;
END"
    ))
}

pub fn drop_schema_script(schema: &str) -> Result<String, StorageError> {
    check(&[schema])?;
    Ok(format!(
        "IF EXISTS (SELECT * FROM sys.schemas WHERE name = N'{schema}')
BEGIN
  EXEC('DROP SCHEMA [{schema}]');
  SELECT 'Schema {schema} dropped' AS Status;
END
ELSE
BEGIN
  SELECT 'Schema {schema} does not exist' AS Status;
END"
    ))
}

pub fn create_login_script(
    database: &str,
    login: &str,
    password: &str,
) -> Result<String, StorageError> {
    check(&[database, login])?;
    let password = literal(password);
    Ok(format!(
        "IF EXISTS (SELECT name FROM sys.server_principals WHERE name = N'{login}')
BEGIN
  SELECT 'LOGIN [{login}] ALREADY EXISTS' AS Status;
END
ELSE
BEGIN
  CREATE LOGIN [{login}] WITH PASSWORD={password}, DEFAULT_DATABASE=[{database}], DEFAULT_LANGUAGE=[us_english], CHECK_EXPIRATION=OFF, CHECK_POLICY=OFF;
  SELECT 'LOGIN [{login}] CREATED' AS Status;
END"
    ))
}

pub fn drop_login_script(login: &str) -> Result<String, StorageError> {
    check(&[login])?;
    Ok(format!(
        "IF EXISTS (SELECT name FROM sys.server_principals WHERE name = N'{login}')
BEGIN
  DROP LOGIN [{login}];
  SELECT 'LOGIN [{login}] DROPPED' AS Status;
END
ELSE
BEGIN
  SELECT 'LOGIN [{login}] DOES NOT EXIST' AS Status;
END"
    ))
}

/// Database user for `login` with read, write and DDL rights, defaulting to
/// `schema`.
pub fn create_user_script(schema: &str, user: &str, login: &str) -> Result<String, StorageError> {
    check(&[schema, user, login])?;
    Ok(format!(
        "IF EXISTS (SELECT name FROM sys.database_principals WHERE type_desc = 'SQL_USER' AND name = N'{user}')
BEGIN
  SELECT 'USER [{user}] ALREADY EXISTS' AS Status;
END
ELSE
BEGIN
  CREATE USER [{user}] FOR LOGIN [{login}] WITH DEFAULT_SCHEMA=[{schema}];
  ALTER ROLE db_datareader ADD MEMBER [{user}];
  ALTER ROLE db_datawriter ADD MEMBER [{user}];
  ALTER ROLE db_ddladmin ADD MEMBER [{user}];
  GRANT ALTER ON SCHEMA::[{schema}] TO [{user}];
  SELECT 'USER [{user}] CREATED' AS Status;
END"
    ))
}

pub fn drop_user_script(user: &str) -> Result<String, StorageError> {
    check(&[user])?;
    Ok(format!(
        "IF EXISTS (SELECT name FROM sys.database_principals WHERE name = N'{user}')
BEGIN
  DROP USER [{user}];
  SELECT 'USER [{user}] DROPPED' AS Status;
END
ELSE
BEGIN
  SELECT 'USER [{user}] DOES NOT EXIST' AS Status;
END"
    ))
}

pub fn add_user_to_role_script(role: &str, user: &str) -> Result<String, StorageError> {
    check(&[role, user])?;
    Ok(format!("ALTER ROLE [{role}] ADD MEMBER [{user}]"))
}

pub fn grant_schema_permission_script(schema: &str, user: &str) -> Result<String, StorageError> {
    check(&[schema, user])?;
    Ok(format!("GRANT ALTER ON SCHEMA::[{schema}] TO [{user}]"))
}

/// SQL logins whose default schema is `schema`.
pub fn users_script(schema: &str) -> Result<String, StorageError> {
    check(&[schema])?;
    Ok(format!(
        "SELECT name FROM sys.database_principals WHERE type = 'S' AND default_schema_name = '{schema}' AND name NOT LIKE '##%';"
    ))
}

pub fn table_names_script(schema: &str) -> Result<String, StorageError> {
    check(&[schema])?;
    Ok(format!(
        "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = '{schema}' AND TABLE_TYPE = 'BASE TABLE';"
    ))
}

/// `DropConstraints(@SchemaName, @TableName)`: drops every key, check and
/// default constraint of one table.
pub fn drop_constraints_proc_script() -> String {
    format!(
        "CREATE OR ALTER PROCEDURE [{MAIN_SCHEMA}].[{DROP_CONSTRAINTS_PROC}] (@SchemaName NVARCHAR(128), @TableName NVARCHAR(128))
AS
BEGIN
  DECLARE @sql NVARCHAR(MAX);
  DECLARE @FullName NVARCHAR(256) = QUOTENAME(@SchemaName) + '.' + QUOTENAME(@TableName);
  DECLARE @KeyName NVARCHAR(128);
  DECLARE key_names CURSOR FOR
    SELECT name FROM sys.foreign_keys WHERE parent_object_id = OBJECT_ID(@FullName)
    UNION SELECT name FROM sys.default_constraints WHERE parent_object_id = OBJECT_ID(@FullName)
    UNION SELECT name FROM sys.check_constraints WHERE parent_object_id = OBJECT_ID(@FullName)
    UNION SELECT name FROM sys.key_constraints WHERE parent_object_id = OBJECT_ID(@FullName);
  OPEN key_names;
  FETCH NEXT FROM key_names INTO @KeyName;
  WHILE @@FETCH_STATUS = 0
  BEGIN
    SET @sql = 'ALTER TABLE ' + @FullName + ' DROP CONSTRAINT ' + QUOTENAME(@KeyName) + ';';
    EXEC sp_executesql @sql;
    FETCH NEXT FROM key_names INTO @KeyName;
  END
  CLOSE key_names;
  DEALLOCATE key_names;
END
GO
SELECT 'Procedure {DROP_CONSTRAINTS_PROC} for {MAIN_SCHEMA} created' AS Status;"
    )
}

/// `DropSchema(@SchemaName)`: drops foreign keys, tables, views, sequences,
/// functions, procedures and types of a schema, then the schema.
pub fn drop_schema_proc_script() -> String {
    format!(
        "CREATE OR ALTER PROCEDURE [{MAIN_SCHEMA}].[{DROP_SCHEMA_PROC}] (@SchemaName NVARCHAR(128))
AS
BEGIN
  DECLARE @sql NVARCHAR(MAX) = N'';
  SELECT @sql += 'ALTER TABLE ' + QUOTENAME(s.name) + '.' + QUOTENAME(t.name) + ' DROP CONSTRAINT ' + QUOTENAME(f.name) + ';'
    FROM sys.foreign_keys f
    INNER JOIN sys.tables t ON f.parent_object_id = t.object_id
    INNER JOIN sys.schemas s ON t.schema_id = s.schema_id
    WHERE s.name = @SchemaName;
  EXEC sp_executesql @sql;

  SET @sql = N'';
  SELECT @sql += 'DROP TABLE IF EXISTS ' + QUOTENAME(s.name) + '.' + QUOTENAME(t.name) + ';'
    FROM sys.tables t
    INNER JOIN sys.schemas s ON t.schema_id = s.schema_id
    WHERE s.name = @SchemaName;
  EXEC sp_executesql @sql;

  SET @sql = N'';
  SELECT @sql += 'DROP VIEW ' + QUOTENAME(s.name) + '.' + QUOTENAME(v.name) + ';'
    FROM sys.views v
    INNER JOIN sys.schemas s ON v.schema_id = s.schema_id
    WHERE s.name = @SchemaName;
  EXEC sp_executesql @sql;

  SET @sql = N'';
  SELECT @sql += 'DROP SEQUENCE ' + QUOTENAME(s.name) + '.' + QUOTENAME(q.name) + ';'
    FROM sys.sequences q
    INNER JOIN sys.schemas s ON q.schema_id = s.schema_id
    WHERE s.name = @SchemaName;
  EXEC sp_executesql @sql;

  SET @sql = N'';
  SELECT @sql += 'DROP FUNCTION ' + QUOTENAME(s.name) + '.' + QUOTENAME(o.name) + ';'
    FROM sys.objects o
    INNER JOIN sys.schemas s ON o.schema_id = s.schema_id
    WHERE s.name = @SchemaName AND o.type IN ('FN', 'IF', 'TF');
  EXEC sp_executesql @sql;

  SET @sql = N'';
  SELECT @sql += 'DROP PROCEDURE ' + QUOTENAME(s.name) + '.' + QUOTENAME(p.name) + ';'
    FROM sys.procedures p
    INNER JOIN sys.schemas s ON p.schema_id = s.schema_id
    WHERE s.name = @SchemaName;
  EXEC sp_executesql @sql;

  SET @sql = N'';
  SELECT @sql += 'DROP TYPE ' + QUOTENAME(s.name) + '.' + QUOTENAME(t.name) + ';'
    FROM sys.types t
    INNER JOIN sys.schemas s ON t.schema_id = s.schema_id
    WHERE s.name = @SchemaName AND t.is_user_defined = 1;
  EXEC sp_executesql @sql;

  SET @sql = N'DROP SCHEMA IF EXISTS ' + QUOTENAME(@SchemaName);
  EXEC sp_executesql @sql;
END
GO
SELECT 'Procedure {DROP_SCHEMA_PROC} for {MAIN_SCHEMA} created' AS Status;"
    )
}

/// `DropObjects`: runs `DropSchema` for every schema except the system
/// schemas and [`MAIN_SCHEMA`].
pub fn drop_objects_proc_script() -> String {
    format!(
        "CREATE OR ALTER PROCEDURE [{MAIN_SCHEMA}].[{DROP_OBJECTS_PROC}]
AS
BEGIN
  DECLARE @SchemaName NVARCHAR(128);
  DECLARE schema_names CURSOR FOR
    SELECT name FROM sys.schemas
    WHERE name NOT IN ('dbo', 'guest', 'INFORMATION_SCHEMA', 'sys', '{MAIN_SCHEMA}')
      AND schema_id < 16384;
  OPEN schema_names;
  FETCH NEXT FROM schema_names INTO @SchemaName;
  WHILE @@FETCH_STATUS = 0
  BEGIN
    EXEC [{MAIN_SCHEMA}].[{DROP_SCHEMA_PROC}] @SchemaName;
    FETCH NEXT FROM schema_names INTO @SchemaName;
  END
  CLOSE schema_names;
  DEALLOCATE schema_names;
END
GO
SELECT 'Procedure {DROP_OBJECTS_PROC} for {MAIN_SCHEMA} created' AS Status;"
    )
}

/// Procedure scripts in install order; `DropObjects` calls `DropSchema`.
pub fn procedure_scripts() -> Vec<String> {
    vec![
        drop_constraints_proc_script(),
        drop_schema_proc_script(),
        drop_objects_proc_script(),
    ]
}

pub fn drop_procedure_script(procedure: &str) -> Result<String, StorageError> {
    check(&[procedure])?;
    Ok(format!(
        "DROP PROCEDURE IF EXISTS [{MAIN_SCHEMA}].[{procedure}]"
    ))
}

pub fn drop_constraints_script(schema: &str, table: &str) -> Result<String, StorageError> {
    check(&[schema, table])?;
    Ok(format!(
        "EXEC [{MAIN_SCHEMA}].[{DROP_CONSTRAINTS_PROC}] @SchemaName = N'{schema}', @TableName = N'{table}'"
    ))
}

pub fn drop_table_script(schema: &str, table: &str) -> Result<String, StorageError> {
    check(&[schema, table])?;
    Ok(format!("DROP TABLE IF EXISTS [{schema}].[{table}]"))
}

/// Removes a user from the database and its login from the server.
pub fn drop_user_and_login_script(database: &str, user: &str) -> Result<String, StorageError> {
    check(&[database, user])?;
    Ok(format!(
        "USE [{database}];
GO
DROP USER IF EXISTS [{user}];
GO
USE [master];
GO
IF EXISTS (SELECT name FROM sys.server_principals WHERE name = N'{user}') DROP LOGIN [{user}];"
    ))
}

/// Runs provisioning scripts with an administrator session.
///
/// Each call opens the session, runs one script and closes it again.
#[derive(Debug)]
pub struct DbAdmin<E: SqlExecutor> {
    executor: E,
}

impl<E: SqlExecutor> DbAdmin<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn into_inner(self) -> E {
        self.executor
    }

    async fn run(&mut self, script: &str, database: &str) -> Result<Vec<String>, StorageError> {
        run_script(&mut self.executor, script, database).await
    }

    pub async fn create_database(&mut self, database: &str) -> Result<Vec<String>, StorageError> {
        self.run(&create_database_script(database)?, database).await
    }

    pub async fn use_database(&mut self, database: &str) -> Result<Vec<String>, StorageError> {
        self.run(&use_database_script(database)?, database).await
    }

    pub async fn drop_database(&mut self, database: &str) -> Result<Vec<String>, StorageError> {
        self.run(&drop_database_script(database)?, database).await
    }

    pub async fn create_schema(
        &mut self,
        database: &str,
        schema: &str,
    ) -> Result<Vec<String>, StorageError> {
        self.run(&create_schema_script(schema)?, database).await
    }

    pub async fn drop_schema(
        &mut self,
        database: &str,
        schema: &str,
    ) -> Result<Vec<String>, StorageError> {
        self.run(&drop_schema_script(schema)?, database).await
    }

    pub async fn create_login(
        &mut self,
        database: &str,
        login: &str,
        password: &str,
    ) -> Result<Vec<String>, StorageError> {
        self.run(&create_login_script(database, login, password)?, database)
            .await
    }

    pub async fn drop_login(
        &mut self,
        database: &str,
        login: &str,
    ) -> Result<Vec<String>, StorageError> {
        self.run(&drop_login_script(login)?, database).await
    }

    pub async fn create_user(
        &mut self,
        database: &str,
        schema: &str,
        user: &str,
        login: &str,
    ) -> Result<Vec<String>, StorageError> {
        self.run(&create_user_script(schema, user, login)?, database)
            .await
    }

    pub async fn drop_user(
        &mut self,
        database: &str,
        user: &str,
    ) -> Result<Vec<String>, StorageError> {
        self.run(&drop_user_script(user)?, database).await
    }

    pub async fn add_user_to_role(
        &mut self,
        database: &str,
        role: &str,
        user: &str,
    ) -> Result<Vec<String>, StorageError> {
        self.run(&add_user_to_role_script(role, user)?, database)
            .await
    }

    pub async fn grant_schema_permission(
        &mut self,
        database: &str,
        schema: &str,
        user: &str,
    ) -> Result<Vec<String>, StorageError> {
        self.run(&grant_schema_permission_script(schema, user)?, database)
            .await
    }

    /// Names of the SQL users defaulting to `schema`.
    pub async fn users(
        &mut self,
        database: &str,
        schema: &str,
    ) -> Result<Vec<String>, StorageError> {
        let output = self.run(&users_script(schema)?, database).await?;
        Ok(string_column(&output, "name"))
    }

    /// Physical names of the tables in `schema`.
    pub async fn table_names(
        &mut self,
        database: &str,
        schema: &str,
    ) -> Result<Vec<String>, StorageError> {
        let output = self.run(&table_names_script(schema)?, database).await?;
        Ok(string_column(&output, "TABLE_NAME"))
    }

    pub async fn install_procedures(&mut self, database: &str) -> Result<(), StorageError> {
        for script in procedure_scripts() {
            self.run(&script, database).await?;
        }
        info!(database, schema = MAIN_SCHEMA, "Installed helper procedures");
        Ok(())
    }

    pub async fn drop_procedures(&mut self, database: &str) -> Result<(), StorageError> {
        for procedure in PROCEDURES {
            self.run(&drop_procedure_script(procedure)?, database).await?;
        }
        Ok(())
    }

    /// Requires the helper procedures.
    pub async fn drop_constraints(
        &mut self,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<String>, StorageError> {
        self.run(&drop_constraints_script(schema, table)?, database)
            .await
    }

    /// Drop every table of `schema`. Constraints go first so foreign keys
    /// never block a drop. Requires the helper procedures.
    pub async fn drop_tables(&mut self, database: &str, schema: &str) -> Result<(), StorageError> {
        let tables = self.table_names(database, schema).await?;
        for table in &tables {
            self.drop_constraints(database, schema, table).await?;
        }
        for table in &tables {
            self.run(&drop_table_script(schema, table)?, database).await?;
        }
        info!(database, schema, tables = tables.len(), "Dropped tables");
        Ok(())
    }

    /// Drop every user defaulting to `schema` together with its login.
    pub async fn drop_users(&mut self, database: &str, schema: &str) -> Result<(), StorageError> {
        for user in self.users(database, schema).await? {
            self.run(&drop_user_and_login_script(database, &user)?, database)
                .await?;
        }
        Ok(())
    }

    /// Database, main and application schema, login, user and helper
    /// procedures in one go. Every step is idempotent.
    pub async fn init_db(
        &mut self,
        database: &str,
        schema: &str,
        login: &str,
        password: &str,
    ) -> Result<(), StorageError> {
        self.create_database(database).await?;
        self.use_database(database).await?;
        self.create_schema(database, MAIN_SCHEMA).await?;
        self.create_schema(database, schema).await?;
        self.create_login(database, login, password).await?;
        self.create_user(database, schema, login, login).await?;
        self.install_procedures(database).await?;
        info!(database, schema, login, "Database initialized");
        Ok(())
    }
}

fn string_column(output: &[String], column: &str) -> Vec<String> {
    output_rows(output)
        .iter()
        .filter_map(|row| row.get(column).and_then(JsonValue::as_str).map(str::to_string))
        .collect()
}
